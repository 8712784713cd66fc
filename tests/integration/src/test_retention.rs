//! Object lock integration tests.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use stowage_s3_core::StorageError;
    use stowage_s3_core::state::{
        CreateBucketOptions, DefaultRetention, DeleteOptions, LifecycleConfiguration,
        LifecycleRule, LockMode, ObjectLockConfig, PutOptions, Retention, RuleStatus,
    };

    use crate::{Harness, put, put_with};

    const LOCKED: CreateBucketOptions = CreateBucketOptions {
        versioning: true,
        object_lock: true,
    };

    fn delete_latest(bypass_governance: bool) -> DeleteOptions {
        DeleteOptions {
            version_id: None,
            bypass_governance,
        }
    }

    #[tokio::test]
    async fn test_should_enforce_compliance_retention_after_restart() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("vault", LOCKED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        let until = Utc::now() + Duration::days(30);
        put_with(
            &h.engine,
            "vault",
            "ledger.csv",
            b"a,b,c",
            PutOptions::builder()
                .retention(Retention {
                    mode: LockMode::Compliance,
                    retain_until: until,
                })
                .build(),
        )
        .await;

        let h = h.restart().await;
        let err = h
            .engine
            .delete_object("vault", "ledger.csv", delete_latest(true))
            .await
            .err()
            .unwrap_or_else(|| panic!("compliance delete should fail"));
        assert!(matches!(err, StorageError::Locked { .. }));

        let shorter = Retention {
            mode: LockMode::Compliance,
            retain_until: until - Duration::days(10),
        };
        let err = h
            .engine
            .put_retention("vault", "ledger.csv", None, Some(shorter), true)
            .await
            .err()
            .unwrap_or_else(|| panic!("shortening compliance should fail"));
        assert!(matches!(err, StorageError::Locked { .. }));

        let longer = Retention {
            mode: LockMode::Compliance,
            retain_until: until + Duration::days(10),
        };
        h.engine
            .put_retention("vault", "ledger.csv", None, Some(longer), false)
            .await
            .unwrap_or_else(|e| panic!("extend retention: {e}"));
        let stored = h
            .engine
            .get_retention("vault", "ledger.csv", None)
            .await
            .unwrap_or_else(|e| panic!("get retention: {e}"));
        assert_eq!(stored, Some(longer));

        let err = h
            .engine
            .delete_bucket("vault")
            .await
            .err()
            .unwrap_or_else(|| panic!("bucket with locked data should stay"));
        assert!(matches!(err, StorageError::Locked { .. }));
    }

    #[tokio::test]
    async fn test_should_stamp_bucket_default_governance_retention() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("vault", CreateBucketOptions::default())
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        h.engine
            .set_object_lock(
                "vault",
                ObjectLockConfig {
                    enabled: true,
                    default_retention: Some(DefaultRetention {
                        mode: LockMode::Governance,
                        days: 7,
                    }),
                },
            )
            .unwrap_or_else(|e| panic!("enable object lock: {e}"));

        let v1 = put(&h.engine, "vault", "notes.md", b"one").await;
        let info = h
            .engine
            .head_object("vault", "notes.md", None)
            .await
            .unwrap_or_else(|e| panic!("head: {e}"));
        let retention = info
            .lock
            .retention
            .unwrap_or_else(|| panic!("default retention not stamped"));
        assert_eq!(retention.mode, LockMode::Governance);
        assert!(retention.retain_until > Utc::now() + Duration::days(6));

        let err = h
            .engine
            .delete_object("vault", "notes.md", delete_latest(false))
            .await
            .err()
            .unwrap_or_else(|| panic!("governance delete without bypass should fail"));
        assert!(matches!(err, StorageError::Locked { .. }));

        let outcome = h
            .engine
            .delete_object("vault", "notes.md", delete_latest(true))
            .await
            .unwrap_or_else(|e| panic!("bypass delete: {e}"));
        assert_eq!(outcome.removed, vec![v1.version_id]);
    }

    #[tokio::test]
    async fn test_should_hold_version_against_lifecycle_until_released() {
        let h = Harness::start().await;
        h.engine
            .create_bucket("vault", LOCKED)
            .await
            .unwrap_or_else(|e| panic!("create bucket: {e}"));
        h.engine
            .set_lifecycle(
                "vault",
                LifecycleConfiguration {
                    rules: vec![LifecycleRule {
                        id: "tmp".to_owned(),
                        status: RuleStatus::Enabled,
                        prefix: "tmp/".to_owned(),
                        expiration_days: 1,
                    }],
                },
            )
            .unwrap_or_else(|e| panic!("set lifecycle: {e}"));
        put(&h.engine, "vault", "tmp/scratch", b"x").await;
        h.engine
            .put_legal_hold("vault", "tmp/scratch", None, true)
            .await
            .unwrap_or_else(|e| panic!("place hold: {e}"));

        let later = Utc::now() + Duration::days(3);
        let held = h
            .engine
            .run_lifecycle_sweep(later)
            .await
            .unwrap_or_else(|e| panic!("sweep: {e}"));
        assert_eq!(held.expired, 0);
        assert_eq!(held.skipped_locked, 1);

        h.engine
            .put_legal_hold("vault", "tmp/scratch", None, false)
            .await
            .unwrap_or_else(|e| panic!("lift hold: {e}"));
        assert!(
            !h.engine
                .get_legal_hold("vault", "tmp/scratch", None)
                .await
                .unwrap_or_else(|e| panic!("get hold: {e}"))
        );
        let released = h
            .engine
            .run_lifecycle_sweep(later)
            .await
            .unwrap_or_else(|e| panic!("sweep: {e}"));
        assert_eq!(released.expired, 1);
        assert!(
            h.engine
                .head_object("vault", "tmp/scratch", None)
                .await
                .is_err()
        );
    }
}
