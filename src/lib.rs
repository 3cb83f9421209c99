//! # dexblock
//!
//! A structural engine for Android DEX files: read an image into pools of
//! items that refer to each other by index, edit them, and write the result
//! back out with fresh offsets, map list, signature and checksum.
//!
//! ```no_run
//!  use dexblock::dex::DexFile;
//!  use std::path::Path;
//!
//!  let mut dex = DexFile::from_file(Path::new("classes.dex")).unwrap();
//!  let removed = dex.remove_unused().unwrap();
//!  println!("{} unused items removed", removed);
//!  dex.write_file(Path::new("classes-out.dex")).unwrap();
//! ```
//!
//! Everything lives under [`dex`]. Data items are read on first reference,
//! deduplicated by offset, and addressed afterwards by pool index through
//! [`dex::IdRef`] and [`dex::DataRef`]. The layout pass turns indices back
//! into offsets when writing.

pub mod dex;

#[cfg(test)]
mod tests;
