//! Contact directory. Writes are last-writer-wins: whoever stores a contact
//! last defines it, with no ordering check against the stored row.

use rusqlite::params;

use skein_shared::types::PeerId;

use crate::database::Database;
use crate::error::{parse_peer, parse_time, Result, StoreError};
use crate::models::ContactRecord;

impl Database {
    /// Insert or replace the contact for `contact.peer_id`.
    pub fn upsert_contact(&self, contact: &ContactRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contacts (peer_id, username, avatar, inbox, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(peer_id) DO UPDATE SET
                username   = excluded.username,
                avatar     = excluded.avatar,
                inbox      = excluded.inbox,
                updated_at = excluded.updated_at",
            params![
                contact.peer_id.to_hex(),
                contact.username,
                contact.avatar,
                contact.inbox,
                contact.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_contact(&self, peer: &PeerId) -> Result<ContactRecord> {
        self.conn()
            .query_row(
                "SELECT peer_id, username, avatar, inbox, updated_at
                 FROM contacts WHERE peer_id = ?1",
                params![peer.to_hex()],
                row_to_contact,
            )
            .map_err(StoreError::from_query)
    }

    pub fn list_contacts(&self) -> Result<Vec<ContactRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT peer_id, username, avatar, inbox, updated_at
             FROM contacts ORDER BY username ASC",
        )?;

        let rows = stmt.query_map([], row_to_contact)?;

        let mut contacts = Vec::new();
        for row in rows {
            contacts.push(row?);
        }
        Ok(contacts)
    }
}

fn row_to_contact(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContactRecord> {
    let peer_hex: String = row.get(0)?;
    let username: String = row.get(1)?;
    let avatar: Option<String> = row.get(2)?;
    let inbox: Option<String> = row.get(3)?;
    let updated_str: String = row.get(4)?;

    Ok(ContactRecord {
        peer_id: parse_peer(0, &peer_hex)?,
        username,
        avatar,
        inbox,
        updated_at: parse_time(4, &updated_str)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn contact(username: &str) -> ContactRecord {
        ContactRecord {
            peer_id: PeerId([3u8; 32]),
            username: username.to_string(),
            avatar: None,
            inbox: Some("http://127.0.0.1:40600".to_string()),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_and_get() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_contact(&contact("alice")).unwrap();

        let got = db.get_contact(&PeerId([3u8; 32])).unwrap();
        assert_eq!(got.username, "alice");
        assert_eq!(db.list_contacts().unwrap().len(), 1);
    }

    #[test]
    fn last_writer_wins() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_contact(&contact("fresh")).unwrap();

        // An older record written later still replaces the row.
        let mut stale = contact("stale");
        stale.updated_at = Utc::now() - Duration::days(1);
        db.upsert_contact(&stale).unwrap();

        assert_eq!(db.get_contact(&stale.peer_id).unwrap().username, "stale");
    }

    #[test]
    fn missing_contact() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_contact(&PeerId([0u8; 32])),
            Err(StoreError::NotFound)
        ));
    }
}
