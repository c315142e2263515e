use std::path::Path;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

const META_DEVICE_ID: &str = "device_id";
const META_CONFIG_NUMBER: &str = "config_number";
const META_SCHEMA_HASH: &str = "schema_hash";
const META_STOPPED_AT: &str = "stopped_at";
const META_SIGNING_KEY: &str = "signing_key";

/// A controller allowed to talk to the accessory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pairing {
    pub controller_id: String,
    /// Ed25519 long-term public key
    pub public_key: Vec<u8>,
    pub admin: bool,
}

/// Persistent pairing state for one accessory.
pub struct PairingStore {
    conn: Connection,
}

impl PairingStore {
    /// Open or create the store with WAL mode enabled
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open pairing store: {}", path.display()))?;

        // Enable WAL mode for crash safety
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL mode")?;

        // Create schema
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS meta (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS pairings (
                controller_id TEXT PRIMARY KEY,
                public_key    BLOB NOT NULL,
                admin         INTEGER NOT NULL DEFAULT 0,
                paired_at     TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create pairing store schema")?;

        Ok(Self { conn })
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()
            .with_context(|| format!("Failed to read {}", key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .with_context(|| format!("Failed to write {}", key))?;
        Ok(())
    }

    /// Accessory device id, derived from `seed` the first time and stable afterwards
    pub fn device_id(&self, seed: &str) -> Result<String> {
        if let Some(id) = self.get(META_DEVICE_ID)? {
            return Ok(id);
        }

        let id = derive_device_id(seed);
        self.set(META_DEVICE_ID, &id)?;
        Ok(id)
    }

    /// Configuration number for the given accessory schema.
    /// Starts at 1 and increases whenever the schema hash differs from the stored one.
    pub fn sync_config_number(&self, schema_hash: &str) -> Result<u32> {
        let stored_hash = self.get(META_SCHEMA_HASH)?;
        let current: u32 = match self.get(META_CONFIG_NUMBER)? {
            Some(n) => n.parse().context("Corrupt config number")?,
            None => 0,
        };

        if current > 0 && stored_hash.as_deref() == Some(schema_hash) {
            return Ok(current);
        }

        let next = current.wrapping_add(1).max(1);
        self.set(META_CONFIG_NUMBER, &next.to_string())?;
        self.set(META_SCHEMA_HASH, schema_hash)?;
        Ok(next)
    }

    /// Seed of the accessory's long-term Ed25519 key, generated on first use
    pub fn signing_key(&self) -> Result<[u8; 32]> {
        if let Some(stored) = self.get(META_SIGNING_KEY)? {
            let bytes = hex::decode(&stored).context("Corrupt signing key")?;
            return bytes
                .try_into()
                .map_err(|_| anyhow::anyhow!("Signing key has the wrong length"));
        }

        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        self.set(META_SIGNING_KEY, &hex::encode(seed))?;
        Ok(seed)
    }

    /// Insert or replace a pairing
    pub fn add_pairing(&self, controller_id: &str, public_key: &[u8], admin: bool) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO pairings (controller_id, public_key, admin, paired_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(controller_id) DO UPDATE SET
                    public_key = excluded.public_key,
                    admin = excluded.admin",
                params![controller_id, public_key, admin, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to store pairing for {}", controller_id))?;
        Ok(())
    }

    pub fn pairing(&self, controller_id: &str) -> Result<Option<Pairing>> {
        self.conn
            .query_row(
                "SELECT controller_id, public_key, admin FROM pairings WHERE controller_id = ?1",
                params![controller_id],
                |row| {
                    Ok(Pairing {
                        controller_id: row.get(0)?,
                        public_key: row.get(1)?,
                        admin: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to read pairing for {}", controller_id))
    }

    pub fn pairings(&self) -> Result<Vec<Pairing>> {
        let mut stmt = self
            .conn
            .prepare("SELECT controller_id, public_key, admin FROM pairings ORDER BY paired_at, controller_id")
            .context("Failed to prepare pairing query")?;

        let rows = stmt
            .query_map([], |row| {
                Ok(Pairing {
                    controller_id: row.get(0)?,
                    public_key: row.get(1)?,
                    admin: row.get(2)?,
                })
            })
            .context("Failed to list pairings")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read pairing row")
    }

    /// Remove a pairing. Once no admin is left every pairing goes, which
    /// returns the accessory to the unpaired state.
    pub fn remove_pairing(&self, controller_id: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM pairings WHERE controller_id = ?1", params![controller_id])
            .with_context(|| format!("Failed to remove pairing for {}", controller_id))?;

        let admins: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pairings WHERE admin = 1", [], |row| row.get(0))
            .context("Failed to count admin pairings")?;
        if admins == 0 {
            self.conn
                .execute("DELETE FROM pairings", [])
                .context("Failed to clear pairings")?;
        }
        Ok(())
    }

    pub fn pairing_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM pairings", [], |row| row.get(0))
            .context("Failed to count pairings")?;
        Ok(count as usize)
    }

    /// Flush state on shutdown
    pub fn record_stop(&self) -> Result<()> {
        self.set(META_STOPPED_AT, &Utc::now().to_rfc3339())?;
        self.conn
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
            .context("Failed to checkpoint pairing store")?;
        Ok(())
    }
}

/// HomeKit device ids look like MAC addresses: "3A:1F:09:C2:77:B4"
fn derive_device_id(seed: &str) -> String {
    let digest = Sha256::digest(seed.as_bytes());
    digest[..6]
        .iter()
        .map(|b| hex::encode_upper([*b]))
        .collect::<Vec<_>>()
        .join(":")
}
