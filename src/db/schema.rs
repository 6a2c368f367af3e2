/// Schema for the store generations, cached responses and the retry queue.
pub const SCHEMA: &str = r#"
-- One row per store generation; at most one is current
CREATE TABLE IF NOT EXISTS cache_generations (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    is_current INTEGER NOT NULL DEFAULT 0
);

-- Captured responses, one per request key per generation
CREATE TABLE IF NOT EXISTS cache_entries (
    generation TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    key_data TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (generation, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_generation
    ON cache_entries(generation);

-- Deferred requests awaiting replay; rowid order is FIFO order
CREATE TABLE IF NOT EXISTS retry_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    enqueued_at TEXT NOT NULL
);
"#;
