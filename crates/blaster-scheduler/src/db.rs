use rusqlite::Connection;

use crate::error::Result;

/// Initialise the broadcast schema in `conn`.
///
/// Creates the `broadcast_jobs` table (idempotent) and an index on `status`
/// so startup recovery only touches still-scheduled rows.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS broadcast_jobs (
            id              TEXT    NOT NULL PRIMARY KEY,
            job_type        TEXT    NOT NULL DEFAULT 'message',
            recipients      TEXT    NOT NULL,   -- JSON array of storage-form numbers
            message_body    TEXT,
            attachments     TEXT    NOT NULL,   -- JSON array of Attachment
            scheduled_at    TEXT    NOT NULL,   -- RFC 3339
            ends_at         TEXT,
            status          TEXT    NOT NULL DEFAULT 'scheduled',
            delivery_result TEXT,               -- JSON DeliveryResult or NULL
            failure_reason  TEXT,
            created_at      TEXT    NOT NULL,
            updated_at      TEXT    NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_broadcast_jobs_status ON broadcast_jobs (status);
        ",
    )?;
    Ok(())
}
