pub mod draw_tiles;
pub mod parse_osm;

use std::{path::Path, time::Instant};
use log::{info, error};

use crate::errors::Result;


/// One cached stage of the pipeline. Stages read what earlier stages left
/// in the working directory and leave their own output there.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: Self::Output) -> Result<()>;

    fn process(&mut self, dir: &Path) -> Result<()> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        let started = Instant::now();
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
        } else {
            info!(etl_name = self.etl_name(); "Extracting");
            let input = self.extract(dir);
            let input = log_failure(self.etl_name(), "Extraction", input)?;

            info!(etl_name = self.etl_name(); "Transforming");
            let output = self.transform(input);
            let output = log_failure(self.etl_name(), "Transformation", output)?;

            info!(etl_name = self.etl_name(); "Loading");
            let loaded = self.load(dir, output);
            log_failure(self.etl_name(), "Loading", loaded)?;
        }
        info!(etl_name = self.etl_name(), elapsed_ms = started.elapsed().as_millis() as u64; "Process finished");
        Ok(())
    }

    /// Drops the cached output first, so the stage runs again.
    fn refresh(&mut self, dir: &Path) -> Result<()> {
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Cleaning cached value");
            self.clean(dir)?;
        }
        self.process(dir)
    }
}

fn log_failure<T>(etl_name: &str, stage: &str, result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        error!(etl_name = etl_name, stage = stage, err = err.message.as_str(); "ETL stage failed with error");
    }
    result
}
