//! Database schema.
//!
//! Applied idempotently at startup. Timestamps are fixed-width RFC 3339
//! strings so that `ORDER BY` on them is chronological.

pub(super) const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id                        INTEGER PRIMARY KEY,
    username                  TEXT NOT NULL,
    password_hash             TEXT NOT NULL,
    totp_enabled              INTEGER NOT NULL DEFAULT 0,
    totp_secret_enc           BLOB,
    totp_last_used            INTEGER,
    totp_reset_required       INTEGER NOT NULL DEFAULT 0,
    role                      TEXT NOT NULL DEFAULT 'user',
    status                    TEXT NOT NULL DEFAULT 'active',
    avatar_id                 TEXT,
    preferred_locales         TEXT NOT NULL DEFAULT '[]',
    notification_preferences  TEXT NOT NULL DEFAULT '{}',
    public_key_pem            TEXT,
    private_key_enc           BLOB,
    created_at                TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username ON users(lower(username));

CREATE TABLE IF NOT EXISTS sessions (
    id                  INTEGER PRIMARY KEY,
    user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    token_hash          TEXT NOT NULL,
    refresh_token_hash  TEXT NOT NULL,
    expires_at          TEXT NOT NULL,
    refreshed_at        TEXT NOT NULL,
    ip_address          TEXT,
    user_agent          TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_token   ON sessions(token_hash);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_refresh ON sessions(refresh_token_hash);
CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id, refreshed_at);

CREATE TABLE IF NOT EXISTS recovery_codes (
    id       INTEGER PRIMARY KEY,
    user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    hash     TEXT NOT NULL,
    used_at  TEXT
);
CREATE INDEX IF NOT EXISTS idx_recovery_codes_user ON recovery_codes(user_id);

CREATE TABLE IF NOT EXISTS login_attempts (
    id          INTEGER PRIMARY KEY,
    username    TEXT NOT NULL,
    ip_address  TEXT NOT NULL,
    success     INTEGER NOT NULL,
    inserted_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_login_attempts_time ON login_attempts(inserted_at);

CREATE TABLE IF NOT EXISTS boards (
    id                INTEGER PRIMARY KEY,
    slug              TEXT NOT NULL,
    name              TEXT NOT NULL,
    description       TEXT NOT NULL DEFAULT '',
    parent_id         INTEGER REFERENCES boards(id) ON DELETE SET NULL,
    position          INTEGER NOT NULL DEFAULT 0,
    min_role_to_view  TEXT NOT NULL DEFAULT 'guest',
    ap_enabled        INTEGER NOT NULL DEFAULT 1,
    ap_accept_policy  TEXT NOT NULL DEFAULT 'open',
    public_key_pem    TEXT,
    private_key_enc   BLOB,
    created_at        TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_boards_slug ON boards(slug);

CREATE TABLE IF NOT EXISTS remote_actors (
    id              INTEGER PRIMARY KEY,
    ap_id           TEXT NOT NULL,
    username        TEXT NOT NULL,
    domain          TEXT NOT NULL,
    display_name    TEXT,
    public_key_pem  TEXT NOT NULL,
    inbox           TEXT NOT NULL,
    shared_inbox    TEXT,
    actor_type      TEXT NOT NULL DEFAULT 'Person',
    icon_url        TEXT,
    fetched_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_remote_actors_ap_id ON remote_actors(ap_id);

CREATE TABLE IF NOT EXISTS articles (
    id               INTEGER PRIMARY KEY,
    title            TEXT NOT NULL,
    body             TEXT NOT NULL,
    body_html        TEXT,
    slug             TEXT NOT NULL,
    pinned           INTEGER NOT NULL DEFAULT 0,
    locked           INTEGER NOT NULL DEFAULT 0,
    forwardable      INTEGER NOT NULL DEFAULT 1,
    deleted_at       TEXT,
    user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    ap_id            TEXT,
    search_text      TEXT NOT NULL DEFAULT '',
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL,
    CHECK ((user_id IS NULL) <> (remote_actor_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_slug  ON articles(slug);
CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_ap_id ON articles(ap_id) WHERE ap_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_articles_author_time ON articles(user_id, created_at);

CREATE TABLE IF NOT EXISTS article_boards (
    article_id  INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    board_id    INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    PRIMARY KEY (article_id, board_id)
);
CREATE INDEX IF NOT EXISTS idx_article_boards_board ON article_boards(board_id);

CREATE TABLE IF NOT EXISTS comments (
    id               INTEGER PRIMARY KEY,
    body             TEXT NOT NULL,
    body_html        TEXT,
    parent_id        INTEGER REFERENCES comments(id) ON DELETE SET NULL,
    article_id       INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    ap_id            TEXT,
    deleted_at       TEXT,
    created_at       TEXT NOT NULL,
    CHECK ((user_id IS NULL) <> (remote_actor_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_comments_ap_id ON comments(ap_id) WHERE ap_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_comments_article ON comments(article_id, created_at);

CREATE TABLE IF NOT EXISTS article_likes (
    id               INTEGER PRIMARY KEY,
    article_id       INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    ap_id            TEXT,
    inserted_at      TEXT NOT NULL,
    CHECK ((user_id IS NULL) <> (remote_actor_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_article_likes_local
    ON article_likes(article_id, user_id) WHERE user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_article_likes_remote
    ON article_likes(article_id, remote_actor_id) WHERE remote_actor_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS announces (
    id               INTEGER PRIMARY KEY,
    object_ap_id     TEXT NOT NULL,
    article_id       INTEGER REFERENCES articles(id) ON DELETE CASCADE,
    remote_actor_id  INTEGER NOT NULL REFERENCES remote_actors(id) ON DELETE CASCADE,
    ap_id            TEXT NOT NULL,
    inserted_at      TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_announces_ap_id ON announces(ap_id);

CREATE TABLE IF NOT EXISTS followers (
    id               INTEGER PRIMARY KEY,
    remote_actor_id  INTEGER NOT NULL REFERENCES remote_actors(id) ON DELETE CASCADE,
    user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    board_id         INTEGER REFERENCES boards(id) ON DELETE CASCADE,
    state            TEXT NOT NULL DEFAULT 'pending',
    ap_id            TEXT NOT NULL,
    created_at       TEXT NOT NULL,
    CHECK ((user_id IS NULL) <> (board_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_followers_user
    ON followers(remote_actor_id, user_id) WHERE user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_followers_board
    ON followers(remote_actor_id, board_id) WHERE board_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_followers_ap_id ON followers(ap_id);

CREATE TABLE IF NOT EXISTS user_follows (
    id                INTEGER PRIMARY KEY,
    user_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    remote_actor_id   INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    followed_user_id  INTEGER REFERENCES users(id) ON DELETE CASCADE,
    state             TEXT NOT NULL DEFAULT 'pending',
    ap_id             TEXT NOT NULL,
    created_at        TEXT NOT NULL,
    CHECK ((remote_actor_id IS NULL) <> (followed_user_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_follows_ap_id ON user_follows(ap_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_follows_remote
    ON user_follows(user_id, remote_actor_id) WHERE remote_actor_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_follows_local
    ON user_follows(user_id, followed_user_id) WHERE followed_user_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS board_follows (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    board_id    INTEGER NOT NULL REFERENCES boards(id) ON DELETE CASCADE,
    state       TEXT NOT NULL DEFAULT 'accepted',
    ap_id       TEXT,
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_board_follows_pair ON board_follows(user_id, board_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_board_follows_ap_id
    ON board_follows(ap_id) WHERE ap_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS user_blocks (
    user_id                 INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    target_user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    target_remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    CHECK ((target_user_id IS NULL) <> (target_remote_actor_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_blocks_local
    ON user_blocks(user_id, target_user_id) WHERE target_user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_blocks_remote
    ON user_blocks(user_id, target_remote_actor_id) WHERE target_remote_actor_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS user_mutes (
    user_id                 INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    target_user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    target_remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    CHECK ((target_user_id IS NULL) <> (target_remote_actor_id IS NULL))
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_mutes_local
    ON user_mutes(user_id, target_user_id) WHERE target_user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_user_mutes_remote
    ON user_mutes(user_id, target_remote_actor_id) WHERE target_remote_actor_id IS NOT NULL;

CREATE TABLE IF NOT EXISTS delivery_jobs (
    id               INTEGER PRIMARY KEY,
    activity         TEXT NOT NULL,
    inbox_url        TEXT NOT NULL,
    actor_uri        TEXT NOT NULL,
    attempts         INTEGER NOT NULL DEFAULT 0,
    next_attempt_at  TEXT NOT NULL,
    last_error       TEXT,
    state            TEXT NOT NULL DEFAULT 'pending',
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_delivery_jobs_due ON delivery_jobs(state, next_attempt_at);

CREATE TABLE IF NOT EXISTS notifications (
    id                     INTEGER PRIMARY KEY,
    user_id                INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    kind                   TEXT NOT NULL,
    actor_user_id          INTEGER REFERENCES users(id) ON DELETE CASCADE,
    actor_remote_actor_id  INTEGER REFERENCES remote_actors(id) ON DELETE CASCADE,
    article_id             INTEGER REFERENCES articles(id) ON DELETE CASCADE,
    comment_id             INTEGER REFERENCES comments(id) ON DELETE CASCADE,
    data                   TEXT NOT NULL DEFAULT '{}',
    read                   INTEGER NOT NULL DEFAULT 0,
    inserted_at            TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_dedup_local
    ON notifications(user_id, kind, actor_user_id,
                     coalesce(article_id, 0), coalesce(comment_id, 0))
    WHERE actor_user_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_dedup_remote
    ON notifications(user_id, kind, actor_remote_actor_id,
                     coalesce(article_id, 0), coalesce(comment_id, 0))
    WHERE actor_remote_actor_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, read, inserted_at);

CREATE TABLE IF NOT EXISTS push_subscriptions (
    id          INTEGER PRIMARY KEY,
    user_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    endpoint    TEXT NOT NULL,
    p256dh      BLOB NOT NULL,
    auth        BLOB NOT NULL,
    user_agent  TEXT,
    created_at  TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_push_subscriptions_endpoint
    ON push_subscriptions(endpoint);

CREATE TABLE IF NOT EXISTS feed_items (
    id               INTEGER PRIMARY KEY,
    ap_id            TEXT NOT NULL,
    remote_actor_id  INTEGER NOT NULL REFERENCES remote_actors(id) ON DELETE CASCADE,
    article_json     TEXT NOT NULL,
    published_at     TEXT NOT NULL,
    deleted_at       TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_feed_items_ap_id ON feed_items(ap_id);
CREATE INDEX IF NOT EXISTS idx_feed_items_actor ON feed_items(remote_actor_id, published_at);

CREATE TABLE IF NOT EXISTS reports (
    id                INTEGER PRIMARY KEY,
    reporter_user_id  INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    article_id        INTEGER REFERENCES articles(id) ON DELETE CASCADE,
    comment_id        INTEGER REFERENCES comments(id) ON DELETE CASCADE,
    reason            TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'open',
    resolved_by       INTEGER REFERENCES users(id) ON DELETE SET NULL,
    resolved_at       TEXT,
    inserted_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS moderation_log (
    id           INTEGER PRIMARY KEY,
    actor_id     INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    action       TEXT NOT NULL,
    target_type  TEXT NOT NULL,
    target_id    TEXT NOT NULL,
    details      TEXT NOT NULL DEFAULT '{}',
    inserted_at  TEXT NOT NULL
);

-- Key-value store for site-level durable state (site actor keypair, VAPID
-- keypair). Private halves are vault-encrypted before they land here.
CREATE TABLE IF NOT EXISTS site_settings (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";
