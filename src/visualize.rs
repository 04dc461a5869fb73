//! Visualizer
//!
//! This module helps visualize the progress of a pack run. It only writes JSON snapshots for
//! the external web viewer; the rendering itself lives outside the crate. A pack run takes a
//! handful of snapshots (one per pass plus the final plan), so the writer simply rewrites the
//! whole document on every save instead of patching the file tail.
//!

use crate::chrono::Local;
use crate::serde_json;
use crate::urlencoding;
use std::fs::File;
use std::io::{Seek, SeekFrom, Write};

use super::util::*;

pub trait PackVisualizer {
    /// take a snapshot, set `abbrev` to true to save space
    fn snapshot(&self, abbrev: bool) -> serde_json::Value;
}

pub type ObjectMap = serde_json::Map<String, serde_json::Value>;

/// merge two snapshot objects; the same key may only appear on both sides with equal values
pub fn snapshot_combine_values(value: &mut serde_json::Value, value_2: serde_json::Value) {
    let object = value.as_object_mut().expect("snapshot must be an object");
    let mut object_2 = match value_2 {
        serde_json::Value::Object(object_2) => object_2,
        _ => panic!("snapshot must be an object"),
    };
    let keys: Vec<String> = object_2.keys().cloned().collect();
    for key in keys {
        let entry = object_2.remove(&key).unwrap();
        match object.get(&key) {
            None => {
                object.insert(key, entry);
            }
            Some(existing) => {
                assert_eq!(
                    existing, &entry,
                    "cannot combine different values of key `{}`: please make sure values don't conflict",
                    key
                );
            }
        }
    }
}

#[derive(Debug)]
pub struct Visualizer {
    /// save to file if applicable
    file: Option<File>,
    /// the fleet under display, written into the document header
    ulds: Vec<UldSpec>,
    /// named snapshots taken so far
    pub snapshots: Vec<(String, serde_json::Value)>,
}

impl Visualizer {
    /// create a new visualizer with target filename and the fleet under display
    pub fn new(mut filepath: Option<String>, ulds: &[UldSpec]) -> std::io::Result<Self> {
        if cfg!(feature = "disable_visualizer") {
            filepath = None; // do not open file
        }
        let file = match filepath {
            Some(filepath) => Some(File::create(filepath)?),
            None => None,
        };
        let mut visualizer = Self {
            file,
            ulds: ulds.to_vec(),
            snapshots: vec![],
        };
        visualizer.save()?;
        Ok(visualizer)
    }

    /// the single JSON document the external viewer loads
    pub fn document(&self) -> serde_json::Value {
        json!({
            "format": "uld_packer",
            "version": env!("CARGO_PKG_VERSION"),
            "ulds": self.ulds.clone(),
            "snapshots": self.snapshots.clone(),
        })
    }

    fn save(&mut self) -> std::io::Result<()> {
        let document = self.document();
        if let Some(file) = self.file.as_mut() {
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            file.write_all(document.to_string().as_bytes())?;
            file.sync_all()?;
        }
        Ok(())
    }

    pub fn incremental_save(&mut self, name: String, value: serde_json::Value) -> std::io::Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        self.snapshots.push((name, value));
        self.save()
    }

    /// append another snapshot, and also update the file in case
    pub fn snapshot(&mut self, name: String, pack_algorithm: &impl PackVisualizer) -> std::io::Result<()> {
        if cfg!(feature = "disable_visualizer") {
            return Ok(());
        }
        let value = pack_algorithm.snapshot(true);
        self.incremental_save(name, value)?;
        Ok(())
    }

    /// append one snapshot combined from several participating objects
    pub fn snapshot_combined(&mut self, name: String, pack_algorithms: Vec<&dyn PackVisualizer>) -> std::io::Result<()> {
        if cfg!(feature = "disable_visualizer") {
            return Ok(());
        }
        let mut value = json!({});
        for pack_algorithm in pack_algorithms.iter() {
            let value_2 = pack_algorithm.snapshot(true);
            snapshot_combine_values(&mut value, value_2);
        }
        self.incremental_save(name, value)?;
        Ok(())
    }
}

/// the viewer assets live next to the crate, so this is a compile time directory
pub fn visualize_data_folder() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/visualize/data/").to_string()
}

pub fn static_visualize_data_filename() -> String {
    "pack-run.json".to_string()
}

/// a timestamped filename, for keeping several runs side by side
pub fn auto_visualize_data_filename() -> String {
    format!("pack-{}.json", Local::now().format("%Y%m%d-%H%M%S"))
}

pub fn print_visualize_link_with_parameters(filename: String, parameters: Vec<(String, String)>) {
    let mut link = format!("http://localhost:8601/?filename={}", filename);
    for (key, value) in parameters {
        link = format!("{link}&{}={}", urlencoding::encode(&key), urlencoding::encode(&value));
    }
    println!("view the packed ULDs at {link} (serve the viewer, e.g. `python3 -m http.server 8601 -d visualize`)");
}

pub fn print_visualize_link(filename: String) {
    print_visualize_link_with_parameters(filename, Vec::new())
}
