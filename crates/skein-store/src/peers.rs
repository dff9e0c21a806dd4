use chrono::Utc;
use rusqlite::params;

use skein_shared::types::{PeerId, ThreadId};

use crate::database::Database;
use crate::error::{parse_peer, Result};

impl Database {
    /// Add a member to a thread. Returns `true` if the peer was new.
    pub fn add_thread_peer(&self, thread_id: &ThreadId, peer: &PeerId) -> Result<bool> {
        let affected = self.conn().execute(
            "INSERT OR IGNORE INTO thread_peers (thread_id, peer_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![thread_id.as_str(), peer.to_hex(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    pub fn remove_thread_peer(&self, thread_id: &ThreadId, peer: &PeerId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM thread_peers WHERE thread_id = ?1 AND peer_id = ?2",
            params![thread_id.as_str(), peer.to_hex()],
        )?;
        Ok(affected > 0)
    }

    /// Members of a thread, in the order they were added.
    pub fn list_thread_peers(&self, thread_id: &ThreadId) -> Result<Vec<PeerId>> {
        let mut stmt = self.conn().prepare(
            "SELECT peer_id FROM thread_peers
             WHERE thread_id = ?1
             ORDER BY added_at ASC, peer_id ASC",
        )?;

        let rows = stmt.query_map(params![thread_id.as_str()], |row| {
            let hex: String = row.get(0)?;
            parse_peer(0, &hex)
        })?;

        let mut peers = Vec::new();
        for row in rows {
            peers.push(row?);
        }
        Ok(peers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::thread;

    #[test]
    fn add_remove_list() {
        let db = Database::open_in_memory().unwrap();
        let t = thread("t1");
        db.insert_thread(&t).unwrap();

        let p1 = PeerId([1u8; 32]);
        let p2 = PeerId([2u8; 32]);

        assert!(db.add_thread_peer(&t.id, &p1).unwrap());
        assert!(!db.add_thread_peer(&t.id, &p1).unwrap());
        assert!(db.add_thread_peer(&t.id, &p2).unwrap());

        let peers = db.list_thread_peers(&t.id).unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&p1));

        assert!(db.remove_thread_peer(&t.id, &p1).unwrap());
        assert_eq!(db.list_thread_peers(&t.id).unwrap(), vec![p2]);
    }

    #[test]
    fn peers_scoped_per_thread() {
        let db = Database::open_in_memory().unwrap();
        let t1 = thread("t1");
        let t2 = thread("t2");
        db.insert_thread(&t1).unwrap();
        db.insert_thread(&t2).unwrap();

        db.add_thread_peer(&t1.id, &PeerId([1u8; 32])).unwrap();
        assert!(db.list_thread_peers(&t2.id).unwrap().is_empty());
    }
}
