//! Flattened device tree lookup
//!
//! Read-only `(path, property)` queries over a DTB blob. Only what the
//! monitor needs: header validation, node lookup by path and property values.

pub const FDT_MAGIC: u32 = 0xd00d_feed;

const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

/// Size of the fixed header
pub const HEADER_LEN: usize = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FdtError {
    #[error("bad FDT magic")]
    BadMagic,
    /// Blob shorter than the header says
    #[error("FDT truncated")]
    Truncated,
    /// Token stream is not well formed
    #[error("malformed FDT structure")]
    BadStructure,
    #[error("not found")]
    NotFound,
}

impl From<FdtError> for crate::error::PlatformError {
    fn from(e: FdtError) -> Self {
        match e {
            FdtError::NotFound => crate::error::PlatformError::NotFound,
            _ => crate::error::PlatformError::Unsupported,
        }
    }
}

fn be32(b: &[u8], at: usize) -> Result<u32, FdtError> {
    let word = b.get(at..at + 4).ok_or(FdtError::Truncated)?;
    Ok(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// `totalsize` from a header, if `header` starts with one
pub fn total_size(header: &[u8]) -> Option<usize> {
    if be32(header, 0).ok()? != FDT_MAGIC {
        return None;
    }
    be32(header, 4).ok().map(|n| n as usize)
}

#[derive(Clone, Copy)]
pub struct Fdt<'a> {
    blob: &'a [u8],
    structs: usize,
    strings: usize,
}

impl<'a> Fdt<'a> {
    pub fn new(blob: &'a [u8]) -> Result<Self, FdtError> {
        if be32(blob, 0)? != FDT_MAGIC {
            return Err(FdtError::BadMagic);
        }
        let total = be32(blob, 4)? as usize;
        if total < HEADER_LEN || total > blob.len() {
            return Err(FdtError::Truncated);
        }
        let blob = &blob[..total];
        let structs = be32(blob, 8)? as usize;
        let strings = be32(blob, 12)? as usize;
        if structs >= total || strings > total {
            return Err(FdtError::Truncated);
        }
        Ok(Fdt {
            blob,
            structs,
            strings,
        })
    }

    pub fn total_size(&self) -> usize {
        self.blob.len()
    }

    fn token(&self, at: usize) -> Result<u32, FdtError> {
        be32(self.blob, at)
    }

    /// NUL-terminated string at `at`, plus the offset just past the NUL
    fn cstr(&self, at: usize) -> Result<(&'a [u8], usize), FdtError> {
        let rest = self.blob.get(at..).ok_or(FdtError::Truncated)?;
        let len = rest.iter().position(|&b| b == 0).ok_or(FdtError::Truncated)?;
        Ok((&rest[..len], at + len + 1))
    }

    fn prop_name(&self, nameoff: u32) -> Result<&'a [u8], FdtError> {
        Ok(self.cstr(self.strings + nameoff as usize)?.0)
    }

    /// Offset of the first token inside the node at `path`
    fn find_node(&self, path: &str) -> Result<usize, FdtError> {
        let mut comps = path.split('/').filter(|c| !c.is_empty());
        let mut want = comps.next();

        if self.token(self.structs)? != FDT_BEGIN_NODE {
            return Err(FdtError::BadStructure);
        }
        let (_, after) = self.cstr(self.structs + 4)?;
        let mut at = align4(after);
        if want.is_none() {
            return Ok(at);
        }

        // Depth below the root, and how many path components matched
        let mut depth = 0usize;
        let mut matched = 0usize;
        loop {
            match self.token(at)? {
                FDT_BEGIN_NODE => {
                    let (name, after) = self.cstr(at + 4)?;
                    at = align4(after);
                    depth += 1;
                    if depth == matched + 1 {
                        if let Some(comp) = want {
                            if node_name_matches(name, comp) {
                                matched += 1;
                                want = comps.next();
                                if want.is_none() {
                                    return Ok(at);
                                }
                            }
                        }
                    }
                }
                FDT_END_NODE => {
                    if depth == 0 || depth == matched {
                        // Left the root or a matched node without finding the rest
                        return Err(FdtError::NotFound);
                    }
                    depth -= 1;
                    at += 4;
                }
                FDT_PROP => {
                    let len = self.token(at + 4)? as usize;
                    at = align4(at + 12 + len);
                }
                FDT_NOP => at += 4,
                FDT_END => return Err(FdtError::NotFound),
                _ => return Err(FdtError::BadStructure),
            }
        }
    }

    pub fn node_exists(&self, path: &str) -> bool {
        self.find_node(path).is_ok()
    }

    /// Raw value of property `name` of the node at `path`
    pub fn property(&self, path: &str, name: &str) -> Result<&'a [u8], FdtError> {
        let mut at = self.find_node(path)?;
        loop {
            match self.token(at)? {
                FDT_PROP => {
                    let len = self.token(at + 4)? as usize;
                    let nameoff = self.token(at + 8)?;
                    let value = self
                        .blob
                        .get(at + 12..at + 12 + len)
                        .ok_or(FdtError::Truncated)?;
                    if self.prop_name(nameoff)? == name.as_bytes() {
                        return Ok(value);
                    }
                    at = align4(at + 12 + len);
                }
                FDT_NOP => at += 4,
                // Properties precede subnodes
                FDT_BEGIN_NODE | FDT_END_NODE | FDT_END => return Err(FdtError::NotFound),
                _ => return Err(FdtError::BadStructure),
            }
        }
    }

    /// First `(base, size)` pair of a `reg` property with 2+2 cells
    pub fn reg(&self, path: &str) -> Result<(u64, u64), FdtError> {
        let reg = self.property(path, "reg")?;
        if reg.len() < 16 {
            return Err(FdtError::BadStructure);
        }
        let cell = |i: usize| -> Result<u64, FdtError> { Ok(be32(reg, i * 4)? as u64) };
        Ok(((cell(0)? << 32) | cell(1)?, (cell(2)? << 32) | cell(3)?))
    }
}

/// `memory@40000000` matches both `memory@40000000` and `memory`
fn node_name_matches(name: &[u8], comp: &str) -> bool {
    let comp = comp.as_bytes();
    if name == comp {
        return true;
    }
    !comp.contains(&b'@') && name.split(|&b| b == b'@').next() == Some(comp)
}
