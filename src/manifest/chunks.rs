use log::debug;

use crate::utils::bytes;

/// Magic byte of every embedded-manifest chunk header.
pub const MANIFEST_CHUNK_MAGIC: u8 = 0x5B;
/// `format, major, minor, magic` followed by `total_chunks: u16, chunk_number: u16`.
pub const MANIFEST_CHUNK_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManifestChunkHeader {
    pub format: u8,
    pub major_version: u8,
    pub minor_version: u8,
    pub magic: u8,
    pub total_chunks: u16,
    pub chunk_number: u16,
}

impl ManifestChunkHeader {
    pub fn from_bytes(buf: &[u8]) -> Option<Self> {
        Some(ManifestChunkHeader {
            format: bytes::read_u8(buf, 0)?,
            major_version: bytes::read_u8(buf, 1)?,
            minor_version: bytes::read_u8(buf, 2)?,
            magic: bytes::read_u8(buf, 3)?,
            total_chunks: bytes::read_u16_le(buf, 4)?,
            chunk_number: bytes::read_u16_le(buf, 6)?,
        })
    }

    fn version(&self) -> (u8, u8, u8) {
        (self.format, self.major_version, self.minor_version)
    }
}

#[derive(Debug)]
struct Assembly {
    version: (u8, u8, u8),
    chunks: Vec<Option<Vec<u8>>>,
    remaining: usize,
}

/// Reassembles an EventSource manifest sent as a sequence of numbered chunks.
///
/// Malformed or out-of-order chunks never fail: they drop whatever was being assembled, and the
/// next chunk 0 starts over.
#[derive(Debug, Default)]
pub struct ManifestChunkReassembler {
    assembly: Option<Assembly>,
}

impl ManifestChunkReassembler {
    pub fn new() -> Self {
        ManifestChunkReassembler::default()
    }

    pub fn is_assembling(&self) -> bool {
        self.assembly.is_some()
    }

    pub fn reset(&mut self) {
        self.assembly = None;
    }

    /// Feed one chunk (header included). Returns the manifest bytes once every chunk arrived.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        match self.try_push(chunk) {
            Ok(assembled) => assembled,
            Err(reason) => {
                debug!("discarding embedded manifest chunk: {}", reason);
                self.reset();
                None
            }
        }
    }

    fn try_push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, &'static str> {
        let header = ManifestChunkHeader::from_bytes(chunk).ok_or("chunk shorter than header")?;
        if header.magic != MANIFEST_CHUNK_MAGIC {
            return Err("bad magic");
        }
        if chunk.len() <= MANIFEST_CHUNK_HEADER_SIZE {
            return Err("chunk has no payload");
        }
        if header.total_chunks == 0 || header.chunk_number >= header.total_chunks {
            return Err("chunk number out of range");
        }

        match &self.assembly {
            None => {
                if header.chunk_number != 0 {
                    return Err("assembly must start with chunk 0");
                }
                let total = usize::from(header.total_chunks);
                self.assembly = Some(Assembly {
                    version: header.version(),
                    chunks: vec![None; total],
                    remaining: total,
                });
            }
            Some(assembly) if assembly.version != header.version() => {
                return Err("format or version changed mid-assembly");
            }
            Some(_) => {}
        }
        let assembly = self.assembly.as_mut().ok_or("no assembly in progress")?;

        let slot = assembly
            .chunks
            .get_mut(usize::from(header.chunk_number))
            .ok_or("chunk number beyond the announced total")?;
        if slot.is_some() {
            return Err("duplicate chunk");
        }
        *slot = Some(chunk[MANIFEST_CHUNK_HEADER_SIZE..].to_vec());
        assembly.remaining -= 1;

        if assembly.remaining > 0 {
            return Ok(None);
        }

        let chunks: Vec<Vec<u8>> = std::mem::take(&mut assembly.chunks)
            .into_iter()
            .flatten()
            .collect();
        self.assembly = None;

        let assembled = if chunks.len() == 1 {
            chunks.into_iter().next()
        } else {
            Some(chunks.concat())
        };
        Ok(assembled)
    }
}
