use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use anyhow::Context;

use crate::schema::Candlestick;

use super::{Receiver, writer::SharedWriter};

/// Writes one JSON object per line (NDJSON).
///
/// Used for both the NDJSON file sink and stdout.
pub struct JsonLinesReceiver<W: Write + Send + 'static> {
    name: String,
    out: SharedWriter<W>,
}

impl JsonLinesReceiver<BufWriter<File>> {
    /// Creates (truncates) the file at `path`.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        Ok(Self::from_writer(
            format!("ndjson:{}", path.display()),
            BufWriter::new(file),
        ))
    }
}

impl JsonLinesReceiver<io::Stdout> {
    /// Prints every candle on its own line.
    pub fn stdout() -> Self {
        Self::from_writer("stdout".into(), io::stdout())
    }
}

impl<W: Write + Send + 'static> JsonLinesReceiver<W> {
    pub fn from_writer(name: String, writer: W) -> Self {
        Self {
            name,
            out: SharedWriter::new(writer),
        }
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> Receiver for JsonLinesReceiver<W> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()> {
        let mut line = serde_json::to_vec(candle)?;
        line.push(b'\n');
        self.out
            .with(move |out| Ok(out.write_all(&line)?))
            .await
    }

    async fn close(&self) {
        self.out.finish(&self.name, |mut out| out.flush()).await;
    }
}

/// Writes a bracket-wrapped JSON array, one candle per line.
///
/// The file is only valid JSON after `close()` writes the closing `]`.
pub struct JsonArrayReceiver {
    name: String,
    out: SharedWriter<ArrayWriter>,
}

struct ArrayWriter {
    file: BufWriter<File>,
    empty: bool,
}

impl JsonArrayReceiver {
    /// Creates (truncates) the file at `path` and opens the array.
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut file = BufWriter::new(file);
        file.write_all(b"[\n")?;

        Ok(Self {
            name: format!("json:{}", path.display()),
            out: SharedWriter::new(ArrayWriter { file, empty: true }),
        })
    }
}

#[async_trait::async_trait]
impl Receiver for JsonArrayReceiver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self, candle: &Candlestick) -> anyhow::Result<()> {
        // Serialize first so a failure never leaves a dangling separator
        let json = serde_json::to_vec(candle)?;
        self.out
            .with(move |out| {
                if !out.empty {
                    out.file.write_all(b",\n")?;
                }
                out.file.write_all(&json)?;
                out.empty = false;
                Ok(())
            })
            .await
    }

    async fn close(&self) {
        self.out
            .finish(&self.name, |mut out| {
                out.file.write_all(b"\n]\n")?;
                out.file.flush()
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64) -> Candlestick {
        Candlestick {
            datetime: format!("t{ts}"),
            granularity: 60,
            low: 1.0,
            high: 2.0,
            open: 1.25,
            close: 1.5,
            volume: 42.0,
            timestamp: ts,
        }
    }

    #[tokio::test]
    async fn ndjson_writes_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ndjson");
        let rcv = JsonLinesReceiver::create(&path).unwrap();

        rcv.collect(&candle(1)).await.unwrap();
        rcv.collect(&candle(2)).await.unwrap();
        rcv.close().await;

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<Candlestick> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(parsed, vec![candle(1), candle(2)]);
    }

    #[tokio::test]
    async fn json_array_is_valid_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let rcv = JsonArrayReceiver::create(&path).unwrap();

        for ts in 1..=3 {
            rcv.collect(&candle(ts)).await.unwrap();
        }
        rcv.close().await;

        let parsed: Vec<Candlestick> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed, vec![candle(1), candle(2), candle(3)]);
    }

    #[tokio::test]
    async fn empty_json_array_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.json");
        JsonArrayReceiver::create(&path).unwrap().close().await;

        let parsed: Vec<Candlestick> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn collect_after_close_fails_and_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let rcv = JsonArrayReceiver::create(&dir.path().join("out.json")).unwrap();

        rcv.close().await;
        rcv.close().await;
        assert!(rcv.collect(&candle(1)).await.is_err());
    }
}
