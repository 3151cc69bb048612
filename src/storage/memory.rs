//! In-memory object store.
//!
//! Keeps object bytes in a `HashMap` behind a `RwLock`. No persistence;
//! intended for tests and throwaway deployments.

use bytes::Bytes;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::backend::{object_not_found, ObjectStore};
use super::presign::UrlSigner;
use crate::errors::ServiceError;

pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
    signer: Arc<UrlSigner>,
    public_url: String,
}

impl MemoryStore {
    pub fn new(signer: Arc<UrlSigner>, public_url: String) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            signer,
            public_url,
        }
    }
}

impl ObjectStore for MemoryStore {
    fn put(
        &self,
        object_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            objects.insert(object_key, data);
            Ok(())
        })
    }

    fn get(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            objects
                .get(&object_key)
                .cloned()
                .ok_or_else(|| object_not_found(&object_key))
        })
    }

    fn delete(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().expect("rwlock poisoned");
            objects.remove(&object_key);
            Ok(())
        })
    }

    fn exists(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let objects = self.objects.read().expect("rwlock poisoned");
            Ok(objects.contains_key(&object_key))
        })
    }

    fn presign_get(
        &self,
        object_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            Ok(self.signer.presign(&self.public_url, &object_key, ttl))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(
            Arc::new(UrlSigner::from_config("test-key")),
            "http://localhost:9040".to_string(),
        )
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = store();
        store
            .put("images/u1/a1", Bytes::from_static(b"pixels"))
            .await
            .unwrap();
        assert_eq!(&store.get("images/u1/a1").await.unwrap()[..], b"pixels");
        assert!(store.exists("images/u1/a1").await.unwrap());

        store.delete("images/u1/a1").await.unwrap();
        store.delete("images/u1/a1").await.unwrap();
        let err = store.get("images/u1/a1").await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { .. }));
    }
}
