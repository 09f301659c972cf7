//! Scoped maps through the core handle.

use entigrid_core::{Config, CoreError, Schema};
use entigrid_testkit::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    ttl: u64,
}

#[tokio::test]
async fn maps_are_isolated_per_scope() {
    let test = TestCore::start().await;
    let first = test.map(test_scope("sessions"));
    let second = test.map(test_scope("sessions"));

    let session = Session {
        user: "ann".into(),
        ttl: 30,
    };
    first.put("s1", &session).await.unwrap();

    assert_eq!(first.get::<Session>("s1").await.unwrap(), Some(session));
    assert_eq!(second.get::<Session>("s1").await.unwrap(), None);
    assert_eq!(first.keys().await.unwrap(), vec!["s1"]);
    assert!(second.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn later_delete_supersedes_put() {
    let test = TestCore::start().await;
    let sessions = test.map(test_scope("sessions"));

    sessions.put("s1", "value").await.unwrap();
    sessions.delete("s1").await.unwrap();
    assert_eq!(sessions.get::<String>("s1").await.unwrap(), None);
    assert!(sessions.keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn configured_size_limit_applies() {
    let test = TestCore::with_config(Schema::new(), Config::default().map_object_size_limit(32)).await;
    let blobs = test.map(test_scope("blobs"));

    blobs.put("small", &vec![1_u8; 4]).await.unwrap();
    let result = blobs.put("large", &vec![1_u8; 128]).await;
    assert!(matches!(result, Err(CoreError::ObjectTooLarge { limit: 32, .. })));
    assert_eq!(blobs.keys().await.unwrap(), vec!["small"]);
}
