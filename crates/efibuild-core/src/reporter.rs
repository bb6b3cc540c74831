//! Reporter trait for dependency injection
//!
//! Core logic reports progress and status through this trait instead of
//! printing, so the CLI can render it and tests can silence it.

pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Resolving", "Building").
    fn section(&self, title: &str);

    /// Progress through a user-visible loop.
    fn step(&self, description: &str, current: usize, total: usize);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn step(&self, description: &str, current: usize, total: usize) {
        (**self).step(description, current, total);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _: &str) {}
    fn step(&self, _: &str, _: usize, _: usize) {}
    fn info(&self, _: &str) {}
    fn success(&self, _: &str) {}
    fn warning(&self, _: &str) {}
    fn error(&self, _: &str) {}
}

/// Iterator adapter that reports a `step` for every element it yields.
pub struct Progress<'r, I> {
    inner: I,
    reporter: &'r dyn Reporter,
    description: String,
    current: usize,
    total: usize,
}

impl<I: Iterator> Iterator for Progress<'_, I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.inner.next()?;
        self.current += 1;
        self.reporter
            .step(&self.description, self.current, self.total.max(self.current));
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

pub trait ProgressExt: Iterator + Sized {
    /// Wrap the iterator so each element is reported as a step of
    /// `description`.
    fn progress<'r>(self, reporter: &'r dyn Reporter, description: &str) -> Progress<'r, Self> {
        let (lower, upper) = self.size_hint();
        Progress {
            inner: self,
            reporter,
            description: description.to_string(),
            current: 0,
            total: upper.unwrap_or(lower),
        }
    }
}

impl<I: Iterator> ProgressExt for I {}
