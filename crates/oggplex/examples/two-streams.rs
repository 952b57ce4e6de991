//! Two logical streams multiplexed onto one buffer and demultiplexed back.
//!
//! Run with:
//!   cargo run --example two-streams

use std::io::Cursor;
use std::sync::Arc;

use oggplex::{DataHandler, Demuxer, LogicalStream, Muxer, NewStreamHandler, PageMeta};

struct Print {
    serial: u32,
}

impl DataHandler for Print {
    fn on_data(&self, payload: &[u8], meta: PageMeta) -> oggplex::Result<()> {
        eprintln!(
            "[stream {:#010x}] {} bytes, granule {}, closing: {}",
            self.serial,
            payload.len(),
            meta.granule_position,
            meta.closing
        );
        Ok(())
    }
}

struct Announce;

impl NewStreamHandler for Announce {
    fn on_new_stream(&self, stream: &mut LogicalStream) -> oggplex::Result<()> {
        eprintln!("[demux] new logical stream {:#010x}", stream.serial());
        stream.add_data_handler(Arc::new(Print {
            serial: stream.serial(),
        }));
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let muxer = Muxer::new(Vec::new());
    let mut voice = muxer.new_stream();
    let mut slides = muxer
        .new_stream_with_serial(0x5348_4f57)
        .expect("serial should be free");

    voice.write(b"hello", 0, true, false)?;
    slides.write(&[0u8; 300], 0, true, false)?;
    voice.write(b"world", 960, true, true)?;
    slides.write(b"last slide", 1, true, true)?;
    drop(voice);
    drop(slides);

    let wire = muxer.into_inner().expect("all writers dropped");
    eprintln!("[mux] physical stream is {} bytes", wire.len());

    let mut demuxer = Demuxer::new(Cursor::new(wire));
    demuxer.add_new_stream_handler(Arc::new(Announce));
    demuxer.process()?;
    Ok(())
}
