use std::sync::{Arc, Mutex, PoisonError};

/// Where `Println` writes.
pub trait Console: Send + Sync {
    fn write_line(&self, line: &str);
}

pub struct Stdout;

impl Console for Stdout {
    fn write_line(&self, line: &str) {
        println!("{line}");
    }
}

/// Keeps every line in memory, in the order it was written.
#[derive(Clone, Default)]
pub struct Captured(Arc<Mutex<Vec<String>>>);

impl Captured {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Console for Captured {
    fn write_line(&self, line: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line.to_owned());
    }
}
