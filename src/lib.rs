extern crate serde_json;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod model_checking;

pub use model_checking::belief_support::{BeliefSupport, BeliefSupportUnfolder};
pub use model_checking::conditional::{ConditionalFormula, ConditionalUnfolder, Mode};
pub use model_checking::error::{Result, UnfoldError};
pub use model_checking::hole_variance::{inconsistent_hole_variance, ChoiceColoring, Coloring, DesignSpace, Family};
pub use model_checking::memory::MemoryAutomaton;
pub use model_checking::memory_product::MemoryProductUnfolder;
pub use model_checking::scheduler::{MemoryStructure, Scheduler};
pub use model_checking::sts::{Labelling, RewardModel, Sts, TransitionMatrix, TransitionMatrixBuilder, TransitionPair};

fn read_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> Result<T> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let u = serde_json::from_reader(reader)?;
    Ok(u)
}

/// Reads a model and checks its sparse structure
pub fn read_sts_json<P: AsRef<Path>>(path: P) -> Result<Sts> {
    let sts: Sts = read_json(path)?;
    sts.validate()?;
    Ok(sts)
}

pub fn read_memory_json<P: AsRef<Path>>(path: P) -> Result<MemoryAutomaton> {
    let memory: MemoryAutomaton = read_json(path)?;
    memory.validate()?;
    Ok(memory)
}

pub fn read_scheduler_json<P: AsRef<Path>>(path: P) -> Result<Scheduler> {
    read_json(path)
}

pub fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

/// Writes one csv record per index of the given maps, with the index as the first column
pub fn write_maps_csv<P: AsRef<Path>>(path: P, headers: &[&str], columns: &[Vec<String>]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    let mut header = vec!["index"];
    header.extend_from_slice(headers);
    wtr.write_record(&header)?;
    let rows = columns.iter().map(|c| c.len()).max().unwrap_or(0);
    for i in 0..rows {
        let mut record: Vec<String> = vec![i.to_string()];
        record.extend(columns.iter().map(|c| c.get(i).cloned().unwrap_or_default()));
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    Ok(())
}
