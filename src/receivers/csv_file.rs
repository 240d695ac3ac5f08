use std::{fs::File, path::Path};

use anyhow::Context;

use crate::schema::Candlestick;

use super::{Receiver, writer::SharedWriter};

/// Column header written once when the file is created.
pub const HEADER: [&str; 7] = ["Time", "Granularity", "Low", "High", "Open", "Close", "Volume"];

/// Appends one CSV row per candle.
///
/// Rows are flushed as they are written so a crashed run still
/// leaves every collected candle on disk.
pub struct CsvReceiver {
    name: String,
    writer: SharedWriter<csv::Writer<File>>,
}

impl CsvReceiver {
    /// Creates (truncates) the file at `path` and writes the header.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        writer.write_record(HEADER)?;
        writer.flush()?;

        Ok(Self {
            name: format!("csv:{}", path.display()),
            writer: SharedWriter::new(writer),
        })
    }
}

fn row(candle: &Candlestick) -> [String; 7] {
    [
        candle.datetime.clone(),
        candle.granularity.to_string(),
        candle.low.to_string(),
        candle.high.to_string(),
        candle.open.to_string(),
        candle.close.to_string(),
        candle.volume.to_string(),
    ]
}

#[async_trait::async_trait]
impl Receiver for CsvReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()> {
        let row = row(candle);
        self.writer
            .with(move |writer| {
                writer.write_record(row)?;
                writer.flush()?;
                Ok(())
            })
            .await
    }

    async fn close(&self) {
        self.writer
            .finish(&self.name, |mut writer| writer.flush())
            .await;
    }
}
