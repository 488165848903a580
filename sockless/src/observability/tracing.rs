use tracing::Level;
use tracing_subscriber::{EnvFilter, fmt};

/// Configuration for the tracing/logging system.
///
/// Injections log through `tracing`: one `inject` span per injection,
/// `debug` events when a request stream or response finishes, `trace`
/// events per chunk. Install a subscriber to see them.
///
/// # Examples
///
/// ```
/// use sockless::observability::TracingConfig;
/// use tracing::Level;
///
/// // Capture engine logs in test output.
/// TracingConfig::new()
///     .level(Level::DEBUG)
///     .test_writer()
///     .try_init();
/// ```
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Output logs as JSON.
    pub json: bool,
    /// The minimum log level.
    pub level: Level,
    /// Include the target (module path) in logs.
    pub with_target: bool,
    /// Include the source file in logs.
    pub with_file: bool,
    /// Include line numbers in logs.
    pub with_line_number: bool,
    /// Write through libtest's captured output instead of stdout.
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            json: false,
            level: Level::INFO,
            with_target: true,
            with_file: false,
            with_line_number: false,
            test_writer: false,
        }
    }
}

impl TracingConfig {
    /// Creates a new tracing configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables JSON output format.
    pub fn json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Sets the minimum log level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Configures whether to include the target in logs.
    pub fn with_target(mut self, enabled: bool) -> Self {
        self.with_target = enabled;
        self
    }

    /// Configures whether to include file names in logs.
    pub fn with_file(mut self, enabled: bool) -> Self {
        self.with_file = enabled;
        self
    }

    /// Configures whether to include line numbers in logs.
    pub fn with_line_number(mut self, enabled: bool) -> Self {
        self.with_line_number = enabled;
        self
    }

    /// Routes output through the test harness so it is captured per test.
    pub fn test_writer(mut self) -> Self {
        self.test_writer = true;
        self
    }

    /// Initializes the global subscriber. Panics if one is already set.
    pub fn init(self) {
        if !self.try_init() {
            panic!("a global tracing subscriber is already installed");
        }
    }

    /// Initializes the global subscriber unless one is already set.
    /// Returns `true` when this call installed it.
    pub fn try_init(self) -> bool {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.to_string()));

        let builder = fmt()
            .with_env_filter(filter)
            .with_target(self.with_target)
            .with_file(self.with_file)
            .with_line_number(self.with_line_number);

        match (self.json, self.test_writer) {
            (true, true) => builder.json().with_test_writer().try_init().is_ok(),
            (true, false) => builder.json().try_init().is_ok(),
            (false, true) => builder.with_test_writer().try_init().is_ok(),
            (false, false) => builder.try_init().is_ok(),
        }
    }
}
