//! Memory reference traces.
//!
//! A trace is a flat sequence of 24-byte little-endian records, optionally
//! xz-compressed:
//!
//! ```text
//! ip: u64 | addr: u64 | size: u16 | kind: u8 | thread: u8 | reserved: u32
//! ```
//!
//! `kind` is 0 for an instruction fetch (`addr` and `size` ignored), 1 for a
//! load and 2 for a store.

use std::{
    fs,
    io::{self, BufReader, ErrorKind, Read, Seek, SeekFrom, Write},
    path::Path,
    thread::{self, JoinHandle},
};

use crossbeam::channel::{Receiver, Sender};
use xz2::read::XzDecoder;

use crate::{cache::AccessType, error::TraceError};

pub const RECORD_SIZE: usize = 24;

const XZ_MAGIC: [u8; 6] = [0xfd, b'7', b'z', b'X', b'Z', 0x00];

const KIND_FETCH: u8 = 0;
const KIND_LOAD: u8 = 1;
const KIND_STORE: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Fetch {
        ip: u64,
        tid: usize,
    },
    Data {
        ip: u64,
        addr: u64,
        size: u16,
        ty: AccessType,
        tid: usize,
    },
}

impl Event {
    pub fn thread(&self) -> usize {
        match *self {
            Event::Fetch { tid, .. } | Event::Data { tid, .. } => tid,
        }
    }

    pub fn decode(index: u64, record: &[u8; RECORD_SIZE]) -> Result<Self, TraceError> {
        let ip = le_u64(&record[0..8]);
        let addr = le_u64(&record[8..16]);
        let size = u16::from_le_bytes([record[16], record[17]]);
        let kind = record[18];
        let tid = usize::from(record[19]);
        let ty = match kind {
            KIND_FETCH => return Ok(Event::Fetch { ip, tid }),
            KIND_LOAD => AccessType::Load,
            KIND_STORE => AccessType::Store,
            kind => return Err(TraceError::BadRecord { index, kind }),
        };
        Ok(Event::Data {
            ip,
            addr,
            size: size.max(1),
            ty,
            tid,
        })
    }

    /// Fails with `TraceError::Thread` for thread ids that do not fit the
    /// record.
    pub fn encode(&self) -> Result<[u8; RECORD_SIZE], TraceError> {
        let (ip, addr, size, kind, tid) = match *self {
            Event::Fetch { ip, tid } => (ip, 0, 0, KIND_FETCH, tid),
            Event::Data {
                ip,
                addr,
                size,
                ty,
                tid,
            } => {
                let kind = match ty {
                    AccessType::Load => KIND_LOAD,
                    AccessType::Store => KIND_STORE,
                };
                (ip, addr, size, kind, tid)
            }
        };
        let mut record = [0; RECORD_SIZE];
        record[0..8].copy_from_slice(&ip.to_le_bytes());
        record[8..16].copy_from_slice(&addr.to_le_bytes());
        record[16..18].copy_from_slice(&size.to_le_bytes());
        record[18] = kind;
        record[19] = u8::try_from(tid).map_err(|_| TraceError::Thread(tid))?;
        Ok(record)
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Writes `events` as uncompressed records.
pub fn write_events<W: Write>(mut writer: W, events: &[Event]) -> Result<(), TraceError> {
    for event in events {
        writer.write_all(&event.encode()?)?;
    }
    Ok(writer.flush()?)
}

/// Fills `buf` as far as the reader allows. Returns the number of bytes read,
/// which is short only at end of stream.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

enum Decoded<R: Read> {
    Raw(R),
    Xz(XzDecoder<R>),
}

impl<R: Read + Seek> Decoded<R> {
    fn open(mut reader: R) -> io::Result<Self> {
        let mut magic = [0; XZ_MAGIC.len()];
        let n = read_full(&mut reader, &mut magic)?;
        reader.seek(SeekFrom::Start(0))?;
        if n == magic.len() && magic == XZ_MAGIC {
            Ok(Decoded::Xz(XzDecoder::new_multi_decoder(reader)))
        } else {
            Ok(Decoded::Raw(reader))
        }
    }

    fn into_inner(self) -> R {
        match self {
            Decoded::Raw(r) => r,
            Decoded::Xz(r) => r.into_inner(),
        }
    }
}

impl<R: Read> Read for Decoded<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decoded::Raw(r) => r.read(buf),
            Decoded::Xz(r) => r.read(buf),
        }
    }
}

pub type EventBlock = Vec<Event>;

/// Events decoded on a background thread, delivered in blocks.
///
/// The channel closes once the trace is exhausted. A decoding error is sent
/// as the last item.
pub struct Trace {
    pub rec: Receiver<Result<EventBlock, TraceError>>,
    _thread: JoinHandle<()>,
}

impl Trace {
    /// Opens the trace at `path`. With `repeat`, the file is rewound at the
    /// end and replayed until the receiver is dropped.
    pub fn read(
        path: impl AsRef<Path>,
        events_per_block: usize,
        blocks_per_queue: usize,
        repeat: bool,
    ) -> Result<Trace, TraceError> {
        let stream = fs::File::open(path.as_ref())?;
        Ok(Self::spawn(stream, events_per_block, blocks_per_queue, repeat))
    }

    pub fn spawn<R>(reader: R, events_per_block: usize, blocks_per_queue: usize, repeat: bool) -> Trace
    where
        R: Read + Seek + Send + 'static,
    {
        let (sender, receiver) = crossbeam::channel::bounded(blocks_per_queue);
        let events_per_block = events_per_block.max(1);
        let t = thread::spawn(move || Trace::run_thread(reader, events_per_block, repeat, sender));
        Trace {
            rec: receiver,
            _thread: t,
        }
    }

    fn run_thread<R: Read + Seek>(
        reader: R,
        events_per_block: usize,
        repeat: bool,
        queue: Sender<Result<EventBlock, TraceError>>,
    ) {
        if let Err(err) = Self::decode(reader, events_per_block, repeat, &queue) {
            log::error!("trace: {err}");
            let _ = queue.send(Err(err));
        }
    }

    fn decode<R: Read + Seek>(
        reader: R,
        events_per_block: usize,
        repeat: bool,
        queue: &Sender<Result<EventBlock, TraceError>>,
    ) -> Result<(), TraceError> {
        let mut stream = BufReader::new(Decoded::open(reader)?);
        let mut index = 0u64;
        let mut record = [0; RECORD_SIZE];
        loop {
            let mut in_pass = 0usize;
            loop {
                let mut block = Vec::with_capacity(events_per_block);
                while block.len() < events_per_block {
                    match read_full(&mut stream, &mut record)? {
                        0 => break,
                        RECORD_SIZE => {
                            block.push(Event::decode(index, &record)?);
                            index += 1;
                        }
                        n => return Err(TraceError::Truncated(n)),
                    }
                }
                if block.is_empty() {
                    break;
                }
                let full = block.len() == events_per_block;
                in_pass += block.len();
                if queue.send(Ok(block)).is_err() {
                    return Ok(());
                }
                if !full {
                    break;
                }
            }

            if !repeat {
                log::debug!("trace: end after {index} records");
                return Ok(());
            }
            if in_pass == 0 {
                log::warn!("trace: empty, not repeating");
                return Ok(());
            }
            let mut inner = stream.into_inner().into_inner();
            inner.seek(SeekFrom::Start(0))?;
            stream = BufReader::new(Decoded::open(inner)?);
            log::debug!("trace: rewinding after {index} records");
        }
    }
}
