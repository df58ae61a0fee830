//! History recorder.
//!
//! Serializes each event to one complete line and writes it to the shared
//! sink under a mutex, so records from concurrent workers never interleave.
//! Line order reflects emission order only; consumers order by `time` and
//! group by `process`.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::checker::History;
use super::event::Event;

/// Line encoding of the history stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum HistoryFormat {
    /// One JSON object per line.
    #[default]
    Json,
    /// One EDN map per line.
    Edn,
}

impl HistoryFormat {
    /// Encode one event, without the trailing newline.
    pub fn encode(&self, event: &Event) -> io::Result<String> {
        match self {
            HistoryFormat::Json => serde_json::to_string(event).map_err(io::Error::from),
            HistoryFormat::Edn => Ok(event.to_edn()),
        }
    }
}

struct Inner {
    sink: Box<dyn Write + Send>,
    retained: Option<History>,
}

/// Mutex-protected append-only event sink.
pub struct Recorder {
    format: HistoryFormat,
    inner: Mutex<Inner>,
}

impl Recorder {
    /// Record to an arbitrary writer.
    pub fn new(sink: Box<dyn Write + Send>, format: HistoryFormat) -> Self {
        Recorder {
            format,
            inner: Mutex::new(Inner {
                sink,
                retained: None,
            }),
        }
    }

    /// Record to standard output.
    pub fn stdout(format: HistoryFormat) -> Self {
        Self::new(Box::new(io::stdout()), format)
    }

    /// Record to a newly created file.
    pub fn create(path: &Path, format: HistoryFormat) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file)), format))
    }

    /// Record nowhere but keep every event in memory.
    pub fn in_memory() -> Self {
        Self::new(Box::new(io::sink()), HistoryFormat::Json).retaining()
    }

    /// Also keep every recorded event in memory, in emission order.
    pub fn retaining(self) -> Self {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner.retained = Some(History::new());
        }
        self
    }

    /// Append one event as a whole line.
    pub fn record(&self, event: &Event) -> io::Result<()> {
        let mut line = self.format.encode(event)?;
        line.push('\n');

        let mut inner = self.lock()?;
        inner.sink.write_all(line.as_bytes())?;
        inner.sink.flush()?;
        if let Some(history) = inner.retained.as_mut() {
            history.push(event.clone());
        }
        Ok(())
    }

    /// Flush buffered output.
    pub fn flush(&self) -> io::Result<()> {
        self.lock()?.sink.flush()
    }

    /// Copy of the retained history, if retention is enabled.
    pub fn history(&self) -> Option<History> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retained
            .clone()
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "history sink poisoned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::event::{EventKind, OpLabel, OpValue, Tags};
    use std::fs;
    use std::sync::Arc;
    use std::thread;

    fn event(process: u64, time: i64) -> Event {
        Event {
            kind: EventKind::Invoke,
            f: OpLabel::Read,
            value: OpValue::null(),
            process,
            time,
            tags: Tags::register(1),
            cause: None,
            error: None,
        }
    }

    #[test]
    fn test_file_recorder_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");

        let recorder = Recorder::create(&path, HistoryFormat::Json).unwrap();
        recorder.record(&event(0, 1)).unwrap();
        recorder.record(&event(1, 2)).unwrap();
        recorder.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["process"], 0);
        assert_eq!(first["type"], "invoke");
    }

    #[test]
    fn test_edn_recorder() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.edn");

        let recorder = Recorder::create(&path, HistoryFormat::Edn).unwrap();
        recorder.record(&event(4, 9)).unwrap();
        recorder.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "{:type :invoke, :f :read, :value nil, :process 4, :time 9, :register 1}\n"
        );
    }

    #[test]
    fn test_concurrent_records_never_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.jsonl");
        let recorder = Arc::new(Recorder::create(&path, HistoryFormat::Json).unwrap().retaining());

        let handles: Vec<_> = (0..8u64)
            .map(|p| {
                let recorder = recorder.clone();
                thread::spawn(move || {
                    for t in 0..200 {
                        recorder.record(&event(p, t)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        recorder.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let mut count = 0;
        for line in contents.lines() {
            let parsed: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(parsed["process"].as_u64().unwrap() < 8);
            count += 1;
        }
        assert_eq!(count, 1600);
        assert_eq!(recorder.history().unwrap().len(), 1600);
    }

    #[test]
    fn test_in_memory_retains_order() {
        let recorder = Recorder::in_memory();
        recorder.record(&event(0, 5)).unwrap();
        recorder.record(&event(0, 3)).unwrap();

        let history = recorder.history().unwrap();
        let times: Vec<_> = history.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![5, 3]);
    }
}
