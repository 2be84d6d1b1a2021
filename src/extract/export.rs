use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::common::{Frame, ItemCode, PlayerSlot};
use crate::error::SinkError;
use crate::pipeline::RawObservation;

/// One row per frame: the source, then each player's six raw readings.
const HEADER: &str = "frame_number,source,\
player1_position,player1_item1,player1_item2,player1_coins,player1_lap_num,player1_race_laps,\
player2_position,player2_item1,player2_item2,player2_coins,player2_lap_num,player2_race_laps";

/// Append-only CSV of uncorrected readings, written before any smoothing or dedup.
/// Fields a classifier could not read are left empty.
pub struct RawFrameExport {
    path: PathBuf,
    file: Mutex<File>,
}

impl RawFrameExport {
    /// Opens `path` for appending. The header is written only to a new or empty file.
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{HEADER}")?;
        }
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, frame: &Frame, observations: &[RawObservation]) -> Result<(), SinkError> {
        let mut row = format!("{},{}", frame.frame_index(), frame.source().0);
        for slot in PlayerSlot::ALL {
            match observations.iter().find(|obs| obs.entity.slot == slot) {
                Some(obs) => push_readings(&mut row, obs),
                None => row.push_str(",,,,,,"),
            }
        }
        let mut file = self.file.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(file, "{row}")?;
        Ok(())
    }
}

fn push_readings(row: &mut String, obs: &RawObservation) {
    let number = |value: Option<u32>| value.map(|n| n.to_string()).unwrap_or_default();
    let item = |value: Option<ItemCode>| value.map(|i| i.name().to_string()).unwrap_or_default();
    let fields = [
        number(obs.position),
        item(obs.item_slot_1),
        item(obs.item_slot_2),
        number(obs.coins),
        number(obs.lap_num),
        number(obs.race_laps),
    ];
    for field in fields {
        row.push(',');
        row.push_str(&field);
    }
}
