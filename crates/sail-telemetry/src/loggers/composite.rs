use log::{Log, Metadata, Record};

/// A logger that forwards records to a primary logger and,
/// only when the primary logger accepts the record, to the secondary loggers.
/// The primary logger decides the effective log level for all of them.
pub struct CompositeLogger {
    primary: Box<dyn Log>,
    secondary: Vec<Box<dyn Log>>,
}

impl CompositeLogger {
    pub fn new(primary: Box<dyn Log>, secondary: Vec<Box<dyn Log>>) -> Self {
        CompositeLogger { primary, secondary }
    }
}

impl Log for CompositeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.primary.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.primary.enabled(record.metadata()) {
            return;
        }
        self.primary.log(record);
        for logger in &self.secondary {
            logger.log(record);
        }
    }

    fn flush(&self) {
        self.primary.flush();
        for logger in &self.secondary {
            logger.flush();
        }
    }
}
