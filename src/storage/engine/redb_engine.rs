use super::{Operation, PlanBackend};
use crate::core::error::{StorageError, StorageResult};
use crate::core::types::Fingerprint;
use crate::storage::layout::{
    current_surface, decode_plan, encode_plan, upgrade_records, StoredPlan, LAYOUT_VERSION,
    META_LAYOUT_VERSION, META_SURFACE,
};
use crate::storage::redb_types::{ByteKey, META_TABLE, PLANS_TABLE};
use redb::{Database, ReadableTable, WriteTransaction};
use std::path::{Path, PathBuf};

/// redb 文件后端
///
/// 打开时在同一个写事务内完成布局检查：
/// 空库安装当前布局，旧布局整体升级，未知布局拒绝打开。
pub struct RedbPlanBackend {
    db: Database,
    db_path: PathBuf,
}

impl RedbPlanBackend {
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(&db_path).map_err(|e| StorageError::DbError(e.to_string()))?;

        let write_txn = db
            .begin_write()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Self::prepare_layout(&write_txn)?;
        write_txn
            .commit()
            .map_err(|e| StorageError::DbError(e.to_string()))?;

        log::info!("计划存储已打开: {}", db_path.display());
        Ok(Self { db, db_path })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn prepare_layout(write_txn: &WriteTransaction) -> StorageResult<()> {
        let mut meta = write_txn
            .open_table(META_TABLE)
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        let mut plans = write_txn
            .open_table(PLANS_TABLE)
            .map_err(|e| StorageError::DbError(e.to_string()))?;

        let installed = meta
            .get(ByteKey(META_LAYOUT_VERSION.to_vec()))
            .map_err(|e| StorageError::DbError(e.to_string()))?
            .map(|value| value.value().0);

        let version = match installed {
            Some(bytes) => parse_version(&bytes)?,
            None => {
                let has_plans = plans
                    .iter()
                    .map_err(|e| StorageError::DbError(e.to_string()))?
                    .next()
                    .is_some();
                if has_plans {
                    return Err(StorageError::UnsupportedLayout(0));
                }
                log::info!("初始化计划存储布局 v{}", LAYOUT_VERSION);
                LAYOUT_VERSION
            }
        };

        if version > LAYOUT_VERSION || version == 0 {
            return Err(StorageError::UnsupportedLayout(version));
        }

        if version < LAYOUT_VERSION {
            let mut raw = Vec::new();
            for item in plans
                .iter()
                .map_err(|e| StorageError::DbError(e.to_string()))?
            {
                let (key, value) = item.map_err(|e| StorageError::DbError(e.to_string()))?;
                raw.push((key.value().0, value.value().0));
            }

            let (keys, values): (Vec<_>, Vec<_>) = raw.into_iter().unzip();
            let upgraded = upgrade_records(version, values)?;
            let count = upgraded.len();
            for (key, mut plan) in keys.into_iter().zip(upgraded) {
                if let Some(fingerprint) = Fingerprint::from_key_bytes(&key) {
                    plan.fingerprint = fingerprint;
                }
                plans
                    .insert(ByteKey(key), ByteKey(encode_plan(&plan)?))
                    .map_err(|e| StorageError::DbError(e.to_string()))?;
            }
            log::info!(
                "计划存储布局已从 v{} 升级到 v{}，共 {} 条记录",
                version,
                LAYOUT_VERSION,
                count
            );
        }

        // 管理接口定义只由版本决定，每次打开都重写，升级后与全新安装一致
        meta.insert(
            ByteKey(META_LAYOUT_VERSION.to_vec()),
            ByteKey(LAYOUT_VERSION.to_string().into_bytes()),
        )
        .map_err(|e| StorageError::DbError(e.to_string()))?;
        meta.insert(
            ByteKey(META_SURFACE.to_vec()),
            ByteKey(current_surface().into_bytes()),
        )
        .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    fn read_meta(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        let table = read_txn
            .open_table(META_TABLE)
            .map_err(|e| StorageError::DbError(e.to_string()))?;

        match table
            .get(ByteKey(key.to_vec()))
            .map_err(|e| StorageError::DbError(e.to_string()))?
        {
            Some(value) => Ok(Some(value.value().0)),
            None => Ok(None),
        }
    }
}

fn parse_version(bytes: &[u8]) -> StorageResult<u32> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u32>().ok())
        .ok_or_else(|| StorageError::DeserializeError("无法解析布局版本".to_string()))
}

impl PlanBackend for RedbPlanBackend {
    fn load_all(&self) -> StorageResult<Vec<StoredPlan>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        let table = read_txn
            .open_table(PLANS_TABLE)
            .map_err(|e| StorageError::DbError(e.to_string()))?;

        let mut plans = Vec::new();
        for item in table
            .iter()
            .map_err(|e| StorageError::DbError(e.to_string()))?
        {
            let (_, value) = item.map_err(|e| StorageError::DbError(e.to_string()))?;
            plans.push(decode_plan(&value.value().0)?);
        }
        Ok(plans)
    }

    fn put(&self, plan: &StoredPlan) -> StorageResult<()> {
        self.batch(vec![Operation::Put(plan.clone())])
    }

    fn delete(&self, fingerprint: Fingerprint) -> StorageResult<()> {
        self.batch(vec![Operation::Delete(fingerprint)])
    }

    fn batch(&self, ops: Vec<Operation>) -> StorageResult<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        {
            let mut table = write_txn
                .open_table(PLANS_TABLE)
                .map_err(|e| StorageError::DbError(e.to_string()))?;

            for op in ops {
                match op {
                    Operation::Put(plan) => {
                        table
                            .insert(
                                ByteKey(plan.fingerprint.to_key_bytes().to_vec()),
                                ByteKey(encode_plan(&plan)?),
                            )
                            .map_err(|e| StorageError::DbError(e.to_string()))?;
                    }
                    Operation::Delete(fingerprint) => {
                        table
                            .remove(ByteKey(fingerprint.to_key_bytes().to_vec()))
                            .map_err(|e| StorageError::DbError(e.to_string()))?;
                    }
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| StorageError::DbError(e.to_string()))?;
        Ok(())
    }

    fn layout_version(&self) -> StorageResult<u32> {
        match self.read_meta(META_LAYOUT_VERSION)? {
            Some(bytes) => parse_version(&bytes),
            None => Err(StorageError::DbError("缺少布局版本".to_string())),
        }
    }

    fn surface(&self) -> StorageResult<String> {
        let bytes = self
            .read_meta(META_SURFACE)?
            .ok_or_else(|| StorageError::DbError("缺少管理接口定义".to_string()))?;
        String::from_utf8(bytes).map_err(|e| StorageError::DeserializeError(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "redb"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::DependencySet;
    use crate::core::types::ObjectId;
    use crate::storage::layout::{surface_definition, LegacyPlanV1};
    use chrono::Utc;
    use tempfile::TempDir;

    fn stored(fp: u64) -> StoredPlan {
        StoredPlan {
            fingerprint: Fingerprint(fp),
            query_text: format!("SELECT {}", fp),
            plan_hash: fp,
            payload: vec![fp as u8],
            dependencies: DependencySet::new().with_relation(100),
            valid: true,
            usage_count: 3,
            created_at: Utc::now(),
        }
    }

    fn write_v1_database(path: &Path, plans: &[LegacyPlanV1]) {
        let db = Database::create(path).expect("create database");
        let txn = db.begin_write().expect("begin write");
        {
            let mut meta = txn.open_table(META_TABLE).expect("open meta");
            meta.insert(
                ByteKey(META_LAYOUT_VERSION.to_vec()),
                ByteKey(b"1".to_vec()),
            )
            .expect("insert version");
            let surface = surface_definition(1).expect("v1 surface").render();
            meta.insert(ByteKey(META_SURFACE.to_vec()), ByteKey(surface.into_bytes()))
                .expect("insert surface");

            let mut table = txn.open_table(PLANS_TABLE).expect("open plans");
            for plan in plans {
                table
                    .insert(
                        ByteKey(Fingerprint(plan.query_hash).to_key_bytes().to_vec()),
                        ByteKey(serde_json::to_vec(plan).expect("encode legacy")),
                    )
                    .expect("insert plan");
            }
        }
        txn.commit().expect("commit");
    }

    #[test]
    fn test_fresh_install() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let backend =
            RedbPlanBackend::open(temp_dir.path().join("plans.redb")).expect("open backend");
        assert_eq!(backend.layout_version().expect("version"), LAYOUT_VERSION);
        assert_eq!(backend.surface().expect("surface"), current_surface());
        assert!(backend.load_all().expect("load").is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("plans.redb");
        {
            let backend = RedbPlanBackend::open(&path).expect("open backend");
            backend.put(&stored(1)).expect("put");
            backend.put(&stored(2)).expect("put");
            backend.delete(Fingerprint(1)).expect("delete");
        }

        let backend = RedbPlanBackend::open(&path).expect("reopen backend");
        let plans = backend.load_all().expect("load");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].fingerprint, Fingerprint(2));
        assert_eq!(plans[0].usage_count, 3);
    }

    #[test]
    fn test_upgrade_from_v1_matches_fresh_surface() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let legacy_path = temp_dir.path().join("legacy.redb");
        write_v1_database(
            &legacy_path,
            &[
                LegacyPlanV1 {
                    query_hash: 0xabc,
                    plan: b"p1".to_vec(),
                    enable: true,
                    reloids: vec![16384],
                },
                LegacyPlanV1 {
                    query_hash: 0xdef,
                    plan: b"p2".to_vec(),
                    enable: false,
                    reloids: vec![16384, 16390],
                },
            ],
        );

        let upgraded = RedbPlanBackend::open(&legacy_path).expect("upgrade on open");
        let fresh =
            RedbPlanBackend::open(temp_dir.path().join("fresh.redb")).expect("fresh backend");

        assert_eq!(
            upgraded.surface().expect("surface"),
            fresh.surface().expect("surface")
        );
        assert_eq!(upgraded.layout_version().expect("version"), LAYOUT_VERSION);

        let plans = upgraded.load_all().expect("load");
        assert_eq!(plans.len(), 2);
        let invalid = plans
            .iter()
            .find(|p| p.fingerprint == Fingerprint(0xdef))
            .expect("legacy entry kept");
        assert!(!invalid.valid);
        assert!(invalid.dependencies.contains(ObjectId(16390)));
    }

    #[test]
    fn test_future_layout_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().join("future.redb");
        {
            let db = Database::create(&path).expect("create database");
            let txn = db.begin_write().expect("begin write");
            {
                let mut meta = txn.open_table(META_TABLE).expect("open meta");
                meta.insert(
                    ByteKey(META_LAYOUT_VERSION.to_vec()),
                    ByteKey(b"99".to_vec()),
                )
                .expect("insert version");
            }
            txn.commit().expect("commit");
        }

        let result = RedbPlanBackend::open(&path);
        assert!(matches!(result, Err(StorageError::UnsupportedLayout(99))));
    }
}
