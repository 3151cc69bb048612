//! AWS S3 object store.
//!
//! Stores objects in a single upstream S3 bucket under an optional key
//! prefix.  Presigned downloads come straight from the SDK, so links
//! point at the bucket rather than back through this service.
//!
//! Credentials are resolved via the standard AWS credential chain
//! (env vars, `~/.aws/credentials`, IAM role, etc.) unless explicit
//! keys are configured.

use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

use super::backend::{object_not_found, ObjectStore};
use crate::config::S3StorageConfig;
use crate::errors::ServiceError;

/// Object store backed by an AWS S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Create a new S3 store from configuration.
    pub async fn new(cfg: &S3StorageConfig) -> anyhow::Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(cfg.region.clone()));

        if !cfg.endpoint_url.is_empty() {
            config_loader = config_loader.endpoint_url(&cfg.endpoint_url);
        }

        if !cfg.access_key_id.is_empty() && !cfg.secret_access_key.is_empty() {
            let creds = aws_sdk_s3::config::Credentials::new(
                &cfg.access_key_id,
                &cfg.secret_access_key,
                None, // session_token
                None, // expiry
                "imagevault-config",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let sdk_config = config_loader.load().await;
        let s3_config_builder =
            aws_sdk_s3::config::Builder::from(&sdk_config).force_path_style(cfg.use_path_style);
        let client = Client::from_conf(s3_config_builder.build());

        info!(
            "S3 store initialized: bucket={} prefix='{}'",
            cfg.bucket, cfg.prefix
        );

        Ok(Self {
            client,
            bucket: cfg.bucket.clone(),
            prefix: cfg.prefix.clone(),
        })
    }

    fn s3_key(&self, object_key: &str) -> String {
        format!("{}{}", self.prefix, object_key)
    }

    fn map_sdk_error(context: &str, err: impl std::fmt::Display) -> ServiceError {
        ServiceError::StoreUnavailable {
            message: format!("S3 {context}: {err}"),
        }
    }
}

impl ObjectStore for S3Store {
    fn put(
        &self,
        object_key: &str,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&object_key);
            debug!("S3 put_object: bucket={} key={}", self.bucket, s3_key);

            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .body(aws_sdk_s3::primitives::ByteStream::from(data))
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("put_object", e))?;
            Ok(())
        })
    }

    fn get(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Bytes, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&object_key);
            debug!("S3 get_object: bucket={} key={}", self.bucket, s3_key);

            let resp = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| {
                    let service_err = e.into_service_error();
                    if service_err.is_no_such_key() {
                        object_not_found(&object_key)
                    } else {
                        Self::map_sdk_error("get_object", service_err)
                    }
                })?;

            let body = resp
                .body
                .collect()
                .await
                .map_err(|e| Self::map_sdk_error("get_object body", e))?
                .into_bytes();
            Ok(Bytes::from(body.to_vec()))
        })
    }

    fn delete(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&object_key);
            debug!("S3 delete_object: bucket={} key={}", self.bucket, s3_key);

            // delete_object is idempotent upstream.
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
                .map_err(|e| Self::map_sdk_error("delete_object", e))?;
            Ok(())
        })
    }

    fn exists(
        &self,
        object_key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<bool, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&object_key);
            match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .send()
                .await
            {
                Ok(_) => Ok(true),
                Err(e) => {
                    let service_err = e.into_service_error();
                    if service_err.is_not_found() {
                        Ok(false)
                    } else {
                        Err(Self::map_sdk_error("head_object", service_err))
                    }
                }
            }
        })
    }

    fn presign_get(
        &self,
        object_key: &str,
        ttl: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<String, ServiceError>> + Send + '_>> {
        let object_key = object_key.to_string();
        Box::pin(async move {
            let s3_key = self.s3_key(&object_key);
            let presigning = PresigningConfig::expires_in(ttl)
                .map_err(|e| Self::map_sdk_error("presigning config", e))?;

            let presigned = self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(&s3_key)
                .presigned(presigning)
                .await
                .map_err(|e| Self::map_sdk_error("presign get_object", e))?;

            Ok(presigned.uri().to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    // Constructing a real S3Store needs credentials and a network, so
    // only the key mapping is covered here.

    #[test]
    fn test_s3_key_mapping() {
        let prefix = "vault/";
        let object_key = "images/u1/a1";
        assert_eq!(format!("{prefix}{object_key}"), "vault/images/u1/a1");
    }

    #[test]
    fn test_s3_key_mapping_no_prefix() {
        let prefix = "";
        let object_key = "images/u1/a1";
        assert_eq!(format!("{prefix}{object_key}"), "images/u1/a1");
    }
}
