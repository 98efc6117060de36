//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Write
//! transactions are serialized by Redb, which gives the compare-and-insert
//! methods their single-writer guarantee across threads and tasks.

use std::{collections::HashSet, path::Path, sync::Arc};

use exposure_crypto::{EnIntervalNumber, RollingProximityIdentifier, TemporaryExposureKey};
use exposure_proto::DiagnosisKey;
use redb::{Database, ReadableTable, Table, TableDefinition};

use super::{
    DiagnosisInsert, DiagnosisRecord, ExposureRecord, PruneSummary, RetentionCutoff, Storage,
    StorageError, StoredTek,
};

/// Table: teks
/// Key: tek period (interval number)
/// Value: TEK bytes [16 bytes]
const TEKS: TableDefinition<u32, &[u8]> = TableDefinition::new("teks");

/// Table: exposures
/// Key: exposure id
/// Value: rpi [16] + observed_at_secs (8 bytes BE) + aem bytes
const EXPOSURES: TableDefinition<u64, &[u8]> = TableDefinition::new("exposures");

/// Table: exposure_index
/// Key: rpi [16] + exposure id (8 bytes BE)
/// Value: exposure id
const EXPOSURE_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("exposure_index");

/// Table: diagnosis_keys
/// Key: diagnosis id
/// Value: tek [16] + enin (4 bytes BE)
const DIAGNOSIS_KEYS: TableDefinition<u64, &[u8]> = TableDefinition::new("diagnosis_keys");

/// Table: diagnosis_by_tek
/// Key: tek [16]
/// Value: diagnosis id
const DIAGNOSIS_BY_TEK: TableDefinition<&[u8], u64> = TableDefinition::new("diagnosis_by_tek");

/// Table: close_contacts
/// Key: diagnosis id (8 bytes BE) + exposure id (8 bytes BE)
/// Value: exposure id
const CLOSE_CONTACTS: TableDefinition<&[u8], u64> = TableDefinition::new("close_contacts");

/// Table: counters
/// Key: counter name
/// Value: next id to hand out
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const EXPOSURE_COUNTER: &str = "exposure";
const DIAGNOSIS_COUNTER: &str = "diagnosis";

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates all tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(TEKS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(EXPOSURES).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(EXPOSURE_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(DIAGNOSIS_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ =
                txn.open_table(DIAGNOSIS_BY_TEK).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(CLOSE_CONTACTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(COUNTERS).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn latest_tek(&self) -> Result<Option<StoredTek>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(TEKS).map_err(|e| StorageError::Io(e.to_string()))?;

        match table.last().map_err(|e| StorageError::Io(e.to_string()))? {
            Some((period, tek)) => Ok(Some(decode_tek(period.value(), tek.value())?)),
            None => Ok(None),
        }
    }

    fn insert_tek_if_absent(
        &self,
        period: EnIntervalNumber,
        tek: &TemporaryExposureKey,
    ) -> Result<StoredTek, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let persisted = {
            let mut table = txn.open_table(TEKS).map_err(|e| StorageError::Io(e.to_string()))?;

            let existing = table
                .get(period.value())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map(|value| decode_tek(period.value(), value.value()))
                .transpose()?;

            match existing {
                Some(stored) => stored,
                None => {
                    table
                        .insert(period.value(), tek.as_bytes().as_slice())
                        .map_err(|e| StorageError::Io(e.to_string()))?;
                    StoredTek { period, tek: tek.clone() }
                },
            }
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(persisted)
    }

    fn load_teks(&self) -> Result<Vec<StoredTek>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(TEKS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut teks = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (period, tek) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            teks.push(decode_tek(period.value(), tek.value())?);
        }

        Ok(teks)
    }

    fn append_exposure(
        &self,
        rpi: &RollingProximityIdentifier,
        aem: &[u8],
        observed_at_secs: u64,
    ) -> Result<u64, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let id = {
            let mut counters =
                txn.open_table(COUNTERS).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut exposures =
                txn.open_table(EXPOSURES).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut index =
                txn.open_table(EXPOSURE_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;

            let id = next_id(&mut counters, EXPOSURE_COUNTER)?;

            // Format: [rpi: 16][observed_at_secs: 8 BE][aem]
            let mut value = Vec::with_capacity(24 + aem.len());
            value.extend_from_slice(rpi.as_bytes());
            value.extend_from_slice(&observed_at_secs.to_be_bytes());
            value.extend_from_slice(aem);

            exposures
                .insert(id, value.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
            index
                .insert(encode_index_key(rpi, id).as_slice(), id)
                .map_err(|e| StorageError::Io(e.to_string()))?;

            id
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(id)
    }

    fn exposures_matching(
        &self,
        rpis: &HashSet<RollingProximityIdentifier>,
    ) -> Result<Vec<ExposureRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let index = txn.open_table(EXPOSURE_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
        let exposures = txn.open_table(EXPOSURES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut ids = Vec::new();
        for rpi in rpis {
            let start = encode_index_key(rpi, 0);
            let end = encode_index_key(rpi, u64::MAX);

            let results = index
                .range(start.as_slice()..=end.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
            for result in results {
                let (_, id) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                ids.push(id.value());
            }
        }
        ids.sort_unstable();

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let value = exposures
                .get(id)
                .map_err(|e| StorageError::Io(e.to_string()))?
                .ok_or_else(|| StorageError::Corrupt(format!("index refers to missing exposure {id}")))?;
            records.push(decode_exposure(id, value.value())?);
        }

        Ok(records)
    }

    fn load_exposures(&self) -> Result<Vec<ExposureRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(EXPOSURES).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut records = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (id, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            records.push(decode_exposure(id.value(), value.value())?);
        }

        Ok(records)
    }

    fn find_diagnosis(&self, tek: &[u8; 16]) -> Result<Option<u64>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(DIAGNOSIS_BY_TEK).map_err(|e| StorageError::Io(e.to_string()))?;

        let id = table
            .get(tek.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?
            .map(|value| value.value());

        Ok(id)
    }

    fn record_diagnosis(
        &self,
        key: &DiagnosisKey,
        exposure_ids: &[u64],
    ) -> Result<DiagnosisInsert, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;

        let outcome = {
            let mut by_tek =
                txn.open_table(DIAGNOSIS_BY_TEK).map_err(|e| StorageError::Io(e.to_string()))?;

            let existing = by_tek
                .get(key.tek.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?
                .map(|value| value.value());

            if let Some(id) = existing {
                DiagnosisInsert::AlreadyRecorded(id)
            } else {
                let mut counters =
                    txn.open_table(COUNTERS).map_err(|e| StorageError::Io(e.to_string()))?;
                let mut diagnoses =
                    txn.open_table(DIAGNOSIS_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
                let mut contacts =
                    txn.open_table(CLOSE_CONTACTS).map_err(|e| StorageError::Io(e.to_string()))?;

                let id = next_id(&mut counters, DIAGNOSIS_COUNTER)?;

                // Format: [tek: 16][enin: 4 BE]
                let mut value = Vec::with_capacity(20);
                value.extend_from_slice(&key.tek);
                value.extend_from_slice(&key.enin.to_be_bytes());

                diagnoses
                    .insert(id, value.as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                by_tek
                    .insert(key.tek.as_slice(), id)
                    .map_err(|e| StorageError::Io(e.to_string()))?;

                for &exposure_id in exposure_ids {
                    contacts
                        .insert(encode_contact_key(id, exposure_id).as_slice(), exposure_id)
                        .map_err(|e| StorageError::Io(e.to_string()))?;
                }

                DiagnosisInsert::Inserted(id)
            }
        };

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(outcome)
    }

    fn load_diagnoses(&self) -> Result<Vec<DiagnosisRecord>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(DIAGNOSIS_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut records = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (id, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            records.push(DiagnosisRecord { id: id.value(), key: decode_diagnosis_key(value.value())? });
        }

        Ok(records)
    }

    fn close_contacts(&self, diagnosis_id: u64) -> Result<Vec<u64>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(CLOSE_CONTACTS).map_err(|e| StorageError::Io(e.to_string()))?;

        let start = encode_contact_key(diagnosis_id, 0);
        let end = encode_contact_key(diagnosis_id, u64::MAX);

        let results = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StorageError::Io(e.to_string()))?;

        let mut exposure_ids = Vec::new();
        for result in results {
            let (_, exposure_id) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            exposure_ids.push(exposure_id.value());
        }

        Ok(exposure_ids)
    }

    fn prune(&self, cutoff: &RetentionCutoff) -> Result<PruneSummary, StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        let mut summary = PruneSummary::default();

        {
            let mut teks = txn.open_table(TEKS).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut exposures =
                txn.open_table(EXPOSURES).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut index =
                txn.open_table(EXPOSURE_INDEX).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut diagnoses =
                txn.open_table(DIAGNOSIS_KEYS).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut by_tek =
                txn.open_table(DIAGNOSIS_BY_TEK).map_err(|e| StorageError::Io(e.to_string()))?;
            let mut contacts =
                txn.open_table(CLOSE_CONTACTS).map_err(|e| StorageError::Io(e.to_string()))?;

            // Collect first: ranges borrow the table, removals need it mutably
            let expired_periods = {
                let mut periods = Vec::new();
                let results = teks
                    .range(..cutoff.interval.value())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
                for result in results {
                    let (period, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                    periods.push(period.value());
                }
                periods
            };
            for period in &expired_periods {
                teks.remove(*period).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            summary.teks = expired_periods.len();

            let expired_exposures = {
                let mut expired = Vec::new();
                for result in exposures.iter().map_err(|e| StorageError::Io(e.to_string()))? {
                    let (id, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                    let record = decode_exposure(id.value(), value.value())?;
                    if record.observed_at_secs < cutoff.observed_before_secs {
                        expired.push((record.id, record.rpi));
                    }
                }
                expired
            };
            for (id, rpi) in &expired_exposures {
                exposures.remove(*id).map_err(|e| StorageError::Io(e.to_string()))?;
                index
                    .remove(encode_index_key(rpi, *id).as_slice())
                    .map_err(|e| StorageError::Io(e.to_string()))?;
            }
            summary.exposures = expired_exposures.len();

            let expired_diagnoses = {
                let mut expired = Vec::new();
                for result in diagnoses.iter().map_err(|e| StorageError::Io(e.to_string()))? {
                    let (id, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                    let key = decode_diagnosis_key(value.value())?;
                    if key.enin < cutoff.interval.value() {
                        expired.push((id.value(), key.tek));
                    }
                }
                expired
            };
            for (id, tek) in &expired_diagnoses {
                diagnoses.remove(*id).map_err(|e| StorageError::Io(e.to_string()))?;
                by_tek.remove(tek.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            summary.diagnoses = expired_diagnoses.len();

            let removed_diagnoses: HashSet<u64> =
                expired_diagnoses.iter().map(|(id, _)| *id).collect();
            let removed_exposures: HashSet<u64> =
                expired_exposures.iter().map(|(id, _)| *id).collect();

            let dangling_contacts = {
                let mut dangling = Vec::new();
                for result in contacts.iter().map_err(|e| StorageError::Io(e.to_string()))? {
                    let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
                    let (diagnosis_id, exposure_id) = decode_contact_key(key.value())?;
                    if removed_diagnoses.contains(&diagnosis_id)
                        || removed_exposures.contains(&exposure_id)
                    {
                        dangling.push(encode_contact_key(diagnosis_id, exposure_id));
                    }
                }
                dangling
            };
            for key in &dangling_contacts {
                contacts.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
            }
            summary.close_contacts = dangling_contacts.len();
        }

        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(summary)
    }
}

/// Hand out the next id from a named counter.
fn next_id(counters: &mut Table<'_, &'static str, u64>, name: &str) -> Result<u64, StorageError> {
    let next = counters
        .get(name)
        .map_err(|e| StorageError::Io(e.to_string()))?
        .map_or(0, |value| value.value());

    counters.insert(name, next + 1).map_err(|e| StorageError::Io(e.to_string()))?;

    Ok(next)
}

/// Encode exposure index key: `[rpi: 16][id: 8 BE]`
fn encode_index_key(rpi: &RollingProximityIdentifier, id: u64) -> [u8; 24] {
    let mut key = [0u8; 24];
    key[..16].copy_from_slice(rpi.as_bytes());
    key[16..].copy_from_slice(&id.to_be_bytes());
    key
}

/// Encode close-contact key: `[diagnosis_id: 8 BE][exposure_id: 8 BE]`
fn encode_contact_key(diagnosis_id: u64, exposure_id: u64) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&diagnosis_id.to_be_bytes());
    key[8..].copy_from_slice(&exposure_id.to_be_bytes());
    key
}

fn decode_contact_key(bytes: &[u8]) -> Result<(u64, u64), StorageError> {
    let Some((diagnosis_id, exposure_id)) = bytes.split_first_chunk::<8>() else {
        return Err(StorageError::Serialization(format!(
            "close contact key: expected 16 bytes, got {}",
            bytes.len()
        )));
    };
    let exposure_id: [u8; 8] = exposure_id.try_into().map_err(|_| {
        StorageError::Serialization(format!(
            "close contact key: expected 16 bytes, got {}",
            bytes.len()
        ))
    })?;

    Ok((u64::from_be_bytes(*diagnosis_id), u64::from_be_bytes(exposure_id)))
}

fn decode_tek(period: u32, bytes: &[u8]) -> Result<StoredTek, StorageError> {
    let tek = TemporaryExposureKey::from_slice(bytes)
        .map_err(|e| StorageError::Serialization(format!("tek for period {period}: {e}")))?;

    Ok(StoredTek { period: EnIntervalNumber::new(period), tek })
}

fn decode_exposure(id: u64, bytes: &[u8]) -> Result<ExposureRecord, StorageError> {
    let Some((rpi, rest)) = bytes.split_first_chunk::<16>() else {
        return Err(StorageError::Serialization(format!("exposure {id} too short")));
    };
    let Some((observed_at, aem)) = rest.split_first_chunk::<8>() else {
        return Err(StorageError::Serialization(format!("exposure {id} too short")));
    };

    Ok(ExposureRecord {
        id,
        rpi: RollingProximityIdentifier::from_bytes(*rpi),
        aem: aem.to_vec(),
        observed_at_secs: u64::from_be_bytes(*observed_at),
    })
}

fn decode_diagnosis_key(bytes: &[u8]) -> Result<DiagnosisKey, StorageError> {
    let Some((tek, enin)) = bytes.split_first_chunk::<16>() else {
        return Err(StorageError::Serialization("diagnosis key too short".to_string()));
    };
    let enin: [u8; 4] = enin.try_into().map_err(|_| {
        StorageError::Serialization(format!("diagnosis key: expected 20 bytes, got {}", bytes.len()))
    })?;

    Ok(DiagnosisKey::new(*tek, u32::from_be_bytes(enin)))
}
