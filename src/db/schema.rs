/// Schema for namespaces, cached entries, and the pending-action log.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- One row per namespace, stamped with the build that created it
CREATE TABLE IF NOT EXISTS namespaces (
    name TEXT PRIMARY KEY,
    version TEXT NOT NULL,
    capacity INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

-- Cached responses; seq orders entries by insertion for eviction
CREATE TABLE IF NOT EXISTS cache_entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    UNIQUE (namespace, entry_key),
    FOREIGN KEY (namespace) REFERENCES namespaces(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_namespace
    ON cache_entries(namespace, seq);

-- Deferred mutations awaiting delivery; seq is creation order
CREATE TABLE IF NOT EXISTS pending_actions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    payload BLOB,
    created_at TEXT NOT NULL,
    retry_count INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    next_attempt_at TEXT,
    last_error TEXT
);
"#;
