//! Doom-format WAD container.
//!
//! * Reads an entire IWAD/PWAD into RAM; every lump owns its bytes.
//! * Finds map markers (`E1M1`, `MAP01`, ...) and the span of level
//!   lumps that follows each one.
//! * Lets the node builder replace or append lumps inside a level span
//!   and create the matching `GL_xxx` section.
//! * Writes the whole archive back out, data first, directory last.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    collections::HashMap,
    fs::File,
    io::{self, Read, Write},
    path::Path,
};
use thiserror::Error;

/// Size (in bytes) of one directory entry.
const DIR_ENTRY_SIZE: usize = 16;

/// Lump names that may legally follow a map marker.
const LEVEL_LUMPS: &[&str] = &[
    "THINGS", "LINEDEFS", "SIDEDEFS", "VERTEXES", "SEGS", "SSECTORS", "NODES", "SECTORS", "REJECT",
    "BLOCKMAP", "BEHAVIOR", "SCRIPTS",
];

/// Lump names that may follow a GL marker.
const GL_LUMPS: &[&str] = &["GL_VERT", "GL_SEGS", "GL_SSECT", "GL_NODES", "GL_PVS"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WadKind {
    Iwad,
    Pwad,
}

/// One lump, fully resident.
#[derive(Clone, Debug)]
pub struct Lump {
    pub name: [u8; 8],
    pub data: Vec<u8>,
}

impl Lump {
    pub fn new(name: &str, data: Vec<u8>) -> Lump {
        Lump {
            name: pack_name(name),
            data,
        }
    }
}

/// Entire WAD resident in memory.
#[derive(Clone, Debug)]
pub struct Wad {
    pub kind: WadKind,
    lumps: Vec<Lump>,
    by_name: HashMap<String, usize>,
}

/// Errors that can be encountered while opening/parsing a WAD.
#[derive(Error, Debug)]
pub enum WadError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file is neither IWAD nor PWAD")]
    BadMagic,

    #[error("directory extends beyond end of file")]
    DirectoryOutOfBounds,

    #[error("lump {name} (# {index}) slice {offset}+{size} past EOF ({file_size})")]
    BadOffset {
        index: usize,
        name: String,
        offset: u32,
        size: u32,
        file_size: usize,
    },

    #[error("level marker idx {0} out of range")]
    MarkerOob(usize),
}

/// Trim an 8-byte lump name at the first NUL.
pub fn name_str(name: &[u8; 8]) -> &str {
    let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
    std::str::from_utf8(&name[..end]).unwrap_or("?")
}

fn pack_name(s: &str) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, b) in s.bytes().take(8).enumerate() {
        out[i] = b.to_ascii_uppercase();
    }
    out
}

impl Wad {
    /*--------------------------- loading -----------------------------*/

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, WadError> {
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WadError> {
        let mut cur = io::Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        let kind = match &magic {
            b"IWAD" => WadKind::Iwad,
            b"PWAD" => WadKind::Pwad,
            _ => return Err(WadError::BadMagic),
        };

        let num_lumps = cur.read_u32::<LE>()? as usize;
        let dir_offset = cur.read_u32::<LE>()? as usize;

        let dir_end = dir_offset + num_lumps * DIR_ENTRY_SIZE;
        if dir_end > bytes.len() {
            return Err(WadError::DirectoryOutOfBounds);
        }

        let mut lumps = Vec::with_capacity(num_lumps);
        let mut dir = &bytes[dir_offset..dir_end];

        for i in 0..num_lumps {
            let offset = dir.read_u32::<LE>()?;
            let size = dir.read_u32::<LE>()?;
            let mut name = [0u8; 8];
            dir.read_exact(&mut name)?;

            let start = offset as usize;
            let end = start + size as usize;
            if end > bytes.len() {
                return Err(WadError::BadOffset {
                    index: i,
                    name: name_str(&name).into(),
                    offset,
                    size,
                    file_size: bytes.len(),
                });
            }

            lumps.push(Lump {
                name,
                data: bytes[start..end].to_vec(),
            });
        }

        Ok(Self::from_lumps(kind, lumps))
    }

    pub fn from_lumps(kind: WadKind, lumps: Vec<Lump>) -> Self {
        let mut wad = Wad {
            kind,
            lumps,
            by_name: HashMap::new(),
        };
        wad.rebuild_index();
        wad
    }

    fn rebuild_index(&mut self) {
        self.by_name.clear();
        // later lumps shadow earlier ones
        for (i, l) in self.lumps.iter().enumerate().rev() {
            self.by_name
                .entry(name_str(&l.name).to_owned())
                .or_insert(i);
        }
    }

    /*--------------------------- writing -----------------------------*/

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        out.extend_from_slice(match self.kind {
            WadKind::Iwad => b"IWAD",
            WadKind::Pwad => b"PWAD",
        });
        out.write_u32::<LE>(self.lumps.len() as u32).unwrap();
        out.write_u32::<LE>(0).unwrap(); // dir offset patched below

        let mut entries = Vec::with_capacity(self.lumps.len());
        for l in &self.lumps {
            entries.push((out.len() as u32, l.data.len() as u32));
            out.extend_from_slice(&l.data);
        }

        let dir_offset = out.len() as u32;
        for ((offset, size), l) in entries.into_iter().zip(&self.lumps) {
            out.write_u32::<LE>(offset).unwrap();
            out.write_u32::<LE>(size).unwrap();
            out.extend_from_slice(&l.name);
        }

        out[8..12].copy_from_slice(&dir_offset.to_le_bytes());
        out
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), WadError> {
        let mut file = File::create(path)?;
        file.write_all(&self.to_bytes())?;
        Ok(())
    }

    /*--------------------------- lookups -----------------------------*/

    pub fn lumps(&self) -> &[Lump] {
        &self.lumps
    }

    pub fn lump(&self, idx: usize) -> &Lump {
        &self.lumps[idx]
    }

    /// Find the lump with `name` (last one wins, like vanilla Doom).
    pub fn find_lump(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Directory indices of every map marker (`E#M#`, `MAP##`).
    pub fn level_indices(&self) -> Vec<usize> {
        static RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"^(E[1-9]M[1-9]|MAP[0-9][0-9])$").unwrap());

        self.lumps
            .iter()
            .enumerate()
            .filter(|(i, l)| {
                RE.is_match(name_str(&l.name))
                    && self
                        .lumps
                        .get(i + 1)
                        .map(|next| matches!(name_str(&next.name), "THINGS" | "LINEDEFS"))
                        .unwrap_or(false)
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// End (exclusive) of the level span starting at `marker`.
    fn level_span_end(&self, marker: usize) -> usize {
        let mut end = marker + 1;
        while end < self.lumps.len() && LEVEL_LUMPS.contains(&name_str(&self.lumps[end].name)) {
            end += 1;
        }
        end
    }

    /// Index of the named lump inside the level starting at `marker`.
    pub fn find_level_lump(&self, marker: usize, name: &str) -> Option<usize> {
        let end = self.level_span_end(marker);
        (marker + 1..end).find(|&i| name_str(&self.lumps[i].name) == name)
    }

    /// Names that occur more than once within one level span.
    pub fn duplicate_level_lumps(&self, marker: usize) -> Vec<String> {
        let end = self.level_span_end(marker);
        let mut seen: HashMap<&str, usize> = HashMap::new();
        let mut dups = Vec::new();
        for i in marker + 1..end {
            let n = name_str(&self.lumps[i].name);
            if *seen.entry(n).or_insert(0) == 1 {
                dups.push(n.to_owned());
            }
            *seen.get_mut(n).unwrap() += 1;
        }
        dups
    }

    /// True when the level already carries non-empty SEGS/SSECTORS/NODES.
    pub fn has_normal_nodes(&self, marker: usize) -> bool {
        ["SEGS", "SSECTORS", "NODES"].iter().all(|n| {
            self.find_level_lump(marker, n)
                .map(|i| !self.lumps[i].data.is_empty())
                .unwrap_or(false)
        })
    }

    /*------------------------ level editing --------------------------*/

    /// Replace the named lump inside the level, or append it to the
    /// level span when absent.
    pub fn set_level_lump(&mut self, marker: usize, name: &str, data: Vec<u8>) {
        if let Some(i) = self.find_level_lump(marker, name) {
            self.lumps[i].data = data;
        } else {
            let at = self.level_span_end(marker);
            self.lumps.insert(at, Lump::new(name, data));
            self.rebuild_index();
        }
    }

    /// Find or create the `GL_<level>` marker directly after the level
    /// span, returning its index.  `payload` becomes the marker's data
    /// (the builder stores a CHECKSUM text line there).
    pub fn set_gl_marker(&mut self, marker: usize, payload: Vec<u8>) -> usize {
        let level_name = name_str(&self.lumps[marker].name);
        let gl_name = if level_name.len() > 5 {
            // long names (e.g. MAP01 is fine, E1M1 too): GL_LEVEL form
            // only kicks in for names that cannot take the GL_ prefix
            "GL_LEVEL".to_owned()
        } else {
            format!("GL_{level_name}")
        };

        let at = self.level_span_end(marker);

        if at < self.lumps.len() && name_str(&self.lumps[at].name) == gl_name {
            self.lumps[at].data = payload;
            return at;
        }

        self.lumps.insert(at, Lump::new(&gl_name, payload));
        self.rebuild_index();
        at
    }

    /// Replace the named GL lump in the section after `gl_marker`, or
    /// append it to that section.
    pub fn set_gl_lump(&mut self, gl_marker: usize, name: &str, data: Vec<u8>) {
        let mut end = gl_marker + 1;
        while end < self.lumps.len() && GL_LUMPS.contains(&name_str(&self.lumps[end].name)) {
            if name_str(&self.lumps[end].name) == name {
                self.lumps[end].data = data;
                return;
            }
            end += 1;
        }
        self.lumps.insert(end, Lump::new(name, data));
        self.rebuild_index();
    }
}

/*============================== Tests ================================*/
