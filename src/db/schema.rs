pub const SCHEMA: &str = r#"
-- Photos: one row per uploaded image, plus its analysis state
CREATE TABLE IF NOT EXISTS photos (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    object_key TEXT NOT NULL,
    thumbnail_key TEXT,
    original_filename TEXT,
    sort_order INTEGER NOT NULL DEFAULT 0,
    client_order INTEGER,           -- last affinity ranking, NULL = manual order
    uploaded_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,

    -- Analysis lifecycle
    ai_status TEXT NOT NULL DEFAULT 'PENDING'
        CHECK (ai_status IN ('PENDING', 'QUEUED', 'DONE', 'FAILED')),
    ai_processed_at TEXT,
    ai_completed_at TEXT,

    -- Metrics backend
    blur_score REAL,
    quality_score REAL,
    aesthetic_score REAL,
    emotion_label TEXT,
    emotion_valence REAL,
    composite_score REAL,

    -- Narrative backend
    llm_model TEXT,
    llm_score REAL,
    llm_summary TEXT,
    llm_discard_reason TEXT,
    llm_best_in_group INTEGER,
    llm_composition TEXT,
    llm_pose_quality TEXT,
    llm_background_quality TEXT,
    llm_highlights TEXT,            -- JSON array
    llm_issues TEXT,                -- JSON array
    llm_category TEXT,
    llm_tags TEXT,                  -- JSON array
    llm_tokens_used INTEGER         -- tokens of the request that judged this photo's batch
);

CREATE INDEX IF NOT EXISTS idx_photos_project ON photos(project_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_photos_status ON photos(project_id, ai_status);

-- Client favorites: existence is the state
CREATE TABLE IF NOT EXISTS selections (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    photo_id INTEGER NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_selections_project ON selections(project_id);

-- Curated album suggestions, regenerated wholesale per project
CREATE TABLE IF NOT EXISTS album_suggestions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    category TEXT NOT NULL,         -- canonical key or '_highlights'
    name TEXT NOT NULL,
    cover_photo_id INTEGER,
    photo_count INTEGER NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (cover_photo_id) REFERENCES photos(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_album_suggestions_project ON album_suggestions(project_id);

CREATE TABLE IF NOT EXISTS album_photos (
    album_id INTEGER NOT NULL,
    photo_id INTEGER NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (album_id, photo_id),
    FOREIGN KEY (album_id) REFERENCES album_suggestions(id) ON DELETE CASCADE,
    FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
);

-- Detached analysis work consumed by the worker
CREATE TABLE IF NOT EXISTS analysis_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL,
    kind TEXT NOT NULL,             -- 'analyze', 'retry', 'restart'
    photo_ids TEXT NOT NULL,        -- JSON array
    status TEXT NOT NULL DEFAULT 'pending',  -- 'pending', 'running', 'completed', 'failed'
    attempts INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    queued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_analysis_jobs_status ON analysis_jobs(status, id);
"#;

/// Additive migrations for databases created by earlier versions.
/// Failures mean the column already exists and are ignored.
pub const MIGRATIONS: &[&str] = &[
    "ALTER TABLE photos ADD COLUMN client_order INTEGER",
    "ALTER TABLE photos ADD COLUMN llm_model TEXT",
    "ALTER TABLE photos ADD COLUMN llm_tokens_used INTEGER",
];
