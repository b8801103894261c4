use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Write};
use tracing::warn;

/// An already-open text sink owned by one connection.
///
/// The slot starts empty, is filled once at startup, appended to while the
/// worker runs, and closed by the collector after shutdown is acknowledged.
/// Appending to or closing an empty slot does nothing.
pub struct LogWriter {
    name: &'static str,
    sink: Mutex<Option<Box<dyn Write + Send>>>,
}

impl LogWriter {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            sink: Mutex::new(None),
        }
    }

    /// Install the writer, closing any writer attached before it.
    pub fn attach(&self, writer: Box<dyn Write + Send>) {
        let previous = self.sink.lock().replace(writer);
        if let Some(previous) = previous {
            self.finish(previous);
        }
    }

    pub fn is_open(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Append one line. Returns `Ok(false)` when no writer is attached.
    pub fn write_line(&self, line: fmt::Arguments<'_>) -> io::Result<bool> {
        let mut guard = self.sink.lock();
        match guard.as_mut() {
            Some(sink) => {
                sink.write_fmt(line)?;
                sink.write_all(b"\n")?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn flush(&self) -> io::Result<()> {
        match self.sink.lock().as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }

    /// Flush and drop the writer. Idempotent; flush failures are logged.
    pub fn close(&self) {
        let taken = self.sink.lock().take();
        if let Some(sink) = taken {
            self.finish(sink);
        }
    }

    fn finish(&self, mut sink: Box<dyn Write + Send>) {
        if let Err(e) = sink.flush() {
            warn!("Failed to flush {} log on close: {}", self.name, e);
        }
    }
}

impl fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogWriter")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// In-memory sink whose contents survive the writer being dropped.
    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().clone()).unwrap()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FailingFlush;

    impl Write for FailingFlush {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
        }
    }

    #[test]
    fn test_write_lines() {
        let buffer = SharedBuffer::default();
        let log = LogWriter::new("latency");
        log.attach(Box::new(buffer.clone()));

        assert!(log.write_line(format_args!("{},{}", 1, 2)).unwrap());
        assert!(log.write_line(format_args!("done")).unwrap());
        assert_eq!(buffer.contents(), "1,2\ndone\n");
    }

    #[test]
    fn test_unattached_writer_is_noop() {
        let log = LogWriter::new("stats");
        assert!(!log.is_open());
        assert!(!log.write_line(format_args!("ignored")).unwrap());
        log.flush().unwrap();
        log.close();
        log.close();
    }

    #[test]
    fn test_close_is_idempotent() {
        let buffer = SharedBuffer::default();
        let log = LogWriter::new("stats");
        log.attach(Box::new(buffer.clone()));
        log.close();
        assert!(!log.is_open());
        log.close();
        assert!(!log.write_line(format_args!("late")).unwrap());
        assert_eq!(buffer.contents(), "");
    }

    #[test]
    fn test_close_swallows_flush_error() {
        let log = LogWriter::new("latency");
        log.attach(Box::new(FailingFlush));
        log.close();
        assert!(!log.is_open());
    }
}
