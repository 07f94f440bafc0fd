use crate::error::Error;

/// Where one side of a transfer lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    Local(std::path::PathBuf),
    /// object key inside the bucket of the store the sync runs against
    Remote(String),
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Locator::Local(path) => write!(f, "{}", path.display()),
            Locator::Remote(key) => write!(f, "key:{key}"),
        }
    }
}

/// One file's move, consumed exactly once by [`crate::transfer::transfer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    /// forward-slash separated, relative to the source root
    pub relative_path: String,
    pub source: Locator,
    pub destination: Locator,
}

#[derive(Debug)]
pub enum Outcome {
    Success { bytes: u64 },
    Failure(Error),
}

#[derive(Debug)]
pub struct TransferResult {
    pub task: TransferTask,
    pub outcome: Outcome,
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success { .. })
    }
}

/// Base of the destination namespace of a sync
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    LocalDir(std::path::PathBuf),
    Prefix(String),
}

impl Destination {
    /// Destination of `relative_path`, a pure function of the base and the path.
    pub fn locate(&self, relative_path: &str) -> Locator {
        match self {
            Destination::LocalDir(root) => {
                let mut path = root.clone();
                path.extend(relative_path.split('/').filter(|s| !s.is_empty()));
                Locator::Local(path)
            }
            Destination::Prefix(prefix) => Locator::Remote(join_key(prefix, relative_path)),
        }
    }
}

/// Joins an object-key prefix and a relative path with exactly one `/` between them.
pub fn join_key(prefix: &str, relative_path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let relative_path = relative_path.trim_start_matches('/');
    if prefix.is_empty() {
        relative_path.to_string()
    } else {
        format!("{prefix}/{relative_path}")
    }
}

/// Last segment of a prefix, ignoring trailing separators (`"a/b/"` -> `"b"`).
pub fn last_segment(prefix: &str) -> &str {
    let trimmed = prefix.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Directory form of a listing prefix: `"videos"` -> `"videos/"`, `""` stays empty.
pub fn dir_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}
