/// Schema for every table the crate persists to.
pub const SCHEMA: &str = r#"
-- Responses stored by caching jobs, keyed by normalized cache key
CREATE TABLE IF NOT EXISTS cached_responses (
    cache_key TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Learner answers written while offline (one row per answer id)
CREATE TABLE IF NOT EXISTS answers (
    id TEXT PRIMARY KEY,
    question_id TEXT NOT NULL,
    activity TEXT NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_answers_question ON answers(question_id);
CREATE INDEX IF NOT EXISTS idx_answers_activity ON answers(activity);

-- Plugin state documents
CREATE TABLE IF NOT EXISTS plugin_states (
    doc_id TEXT PRIMARY KEY,
    plugin_id INTEGER NOT NULL,
    state TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Activities made available offline
CREATE TABLE IF NOT EXISTS offline_activities (
    content_url TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    resource_url TEXT NOT NULL,
    manifest_name TEXT NOT NULL,
    position INTEGER NOT NULL
);

-- Key-value entries (authoring drafts)
CREATE TABLE IF NOT EXISTS kv_store (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
