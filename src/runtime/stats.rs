use std::time::Duration;

#[derive(Default, Clone, Debug)]
pub struct Stats {
    pub steps: u64,
    pub forks: u64,
    pub calls: u64,
    pub tail_calls: u64,
    pub site_calls: u64,
    pub publications: u64,
    pub bindings: u64,
    pub failures: u64,
    pub commits: u64,
    pub aborts: u64,
    pub ticks: u64,
    pub peak_tokens: usize,
    pub duration: Duration,
}

impl Stats {
    pub fn show(&self) -> String {
        let per_second = if self.duration.is_zero() {
            0
        } else {
            (self.steps as f64 / self.duration.as_secs_f64()) as u64
        };
        format!(
            "\
            \tSteps: {}\n\
            \tForks: {}\n\
            \tCalls: {} ({} tail)\n\
            \tSite Calls: {}\n\
            \tPublications: {}\n\
            \tPruning Bindings: {}\n\
            \tFailures: {}\n\
            \tCommits: {}\n\
            \tAborts: {}\n\
            \tVirtual Ticks: {}\n\
            \tPeak Tokens: {}\n\
            \tTime (ms): {}\n\
            \tSteps per second: {}\n\
        ",
            self.steps,
            self.forks,
            self.calls,
            self.tail_calls,
            self.site_calls,
            self.publications,
            self.bindings,
            self.failures,
            self.commits,
            self.aborts,
            self.ticks,
            self.peak_tokens,
            self.duration.as_millis(),
            per_second,
        )
    }
}
