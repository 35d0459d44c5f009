use std::io::{self, Write};

use serde::Serialize;

use crate::app::{LookupResult, SearchReport, StatusResult};
use crate::corpus::CorpusBuildResult;
use crate::harvester::{CycleReport, HarvestSummary};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_cycle(result: &CycleReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_summary(result: &HarvestSummary) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_search(result: &SearchReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_lookup(result: &LookupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_status(result: &StatusResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_corpus(result: &CorpusBuildResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
