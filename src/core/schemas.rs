//! Database schema definitions for the pack store.
//!
//! One SQLite database holds the three pieces of shared mutable state:
//! the adopted base pack per project, governance locks, and proposal records.

pub const PACK_DB_NAME: &str = "specpack.db";

pub const BASE_PACKS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS base_packs (
        project_id TEXT PRIMARY KEY,
        pack_sha256 TEXT NOT NULL,
        archive BLOB NOT NULL,
        updated_at TEXT NOT NULL
    )
";

pub const GOVERNANCE_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS governance (
        project_id TEXT PRIMARY KEY,
        locked INTEGER NOT NULL DEFAULT 0,
        locked_at_utc TEXT,
        locked_pack_sha256 TEXT,
        updated_at TEXT NOT NULL
    )
";

pub const PROPOSALS_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS proposals (
        id TEXT PRIMARY KEY,
        project_id TEXT NOT NULL,
        created_at_utc TEXT NOT NULL,
        record TEXT NOT NULL -- canonical JSON proposal record
    )
";

pub const PROPOSALS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_proposals_project ON proposals(project_id, created_at_utc, id)";

pub const ALL_SCHEMAS: &[&str] = &[
    BASE_PACKS_SCHEMA,
    GOVERNANCE_SCHEMA,
    PROPOSALS_SCHEMA,
    PROPOSALS_INDEX,
];
