use async_trait::async_trait;
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ServerSideEncryption};
use aws_sdk_s3::Client;
use bytes::Bytes;
use http::Uri;
use serde::Deserialize;

use super::{CompletedObject, Key, Part, MAX_PART_NUMBER};

pub(crate) mod logging;
use super::errors::{Error, Result};
use super::s3::logging::LoggingInterceptor;
use super::ObjectStore;

/// Connection settings for S3 or an S3-compatible service.
///
/// Every field is optional; anything left out is resolved through the AWS SDK's usual
/// environment chain (`AWS_REGION`, `AWS_ACCESS_KEY_ID`, instance profiles, ...).
#[derive(Clone, Debug, Default, Deserialize)]
pub struct S3Config {
    pub(crate) region: Option<String>,
    pub(crate) endpoint: Option<String>,
    pub(crate) access_key: Option<String>,
    pub(crate) secret_key: Option<String>,
    #[serde(default)]
    pub(crate) force_path_style: bool,
    /// Requested on every created object, e.g. `aws:kms` or `AES256`.
    pub(crate) server_side_encryption: Option<String>,
}

impl S3Config {
    pub async fn new_objects(&self) -> Result<S3> {
        let sdk_config = aws_config::load_from_env().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(self.force_path_style)
            .interceptor(LoggingInterceptor);

        if let Some(region) = &self.region {
            builder = builder.region(Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) = (&self.access_key, &self.secret_key) {
            let scp = SharedCredentialsProvider::new(
                Credentials::new(
                    access_key.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    "ferry",
                )
                .provide_credentials()
                .await?,
            );
            builder = builder.credentials_provider(scp);
        }

        let endpoint = match &self.endpoint {
            Some(endpoint) => {
                // reject garbage early rather than on the first request
                let uri: Uri = endpoint
                    .parse()
                    .map_err(|e: http::uri::InvalidUri| Error::HTTPError(e.into()))?;
                let endpoint = uri.to_string().trim_end_matches('/').to_string();
                builder = builder.endpoint_url(endpoint.clone());
                Some(endpoint)
            }
            None => None,
        };

        let region = self
            .region
            .clone()
            .or_else(|| sdk_config.region().map(|r| r.to_string()))
            .unwrap_or_else(|| String::from("us-east-1"));

        let server_side_encryption = self
            .server_side_encryption
            .as_deref()
            .map(ServerSideEncryption::from);

        Ok(S3 {
            client: Client::from_conf(builder.build()),
            region,
            endpoint,
            force_path_style: self.force_path_style,
            server_side_encryption,
        })
    }
}

#[derive(Clone)]
pub struct S3 {
    client: Client,
    region: String,
    endpoint: Option<String>,
    force_path_style: bool,
    server_side_encryption: Option<ServerSideEncryption>,
}

impl S3 {
    /// URL of an object, used when the backend response does not carry a location.
    fn object_url(&self, bucket: &str, key: &Key) -> String {
        object_url(
            self.endpoint.as_deref(),
            &self.region,
            self.force_path_style,
            bucket,
            key,
        )
    }
}

fn object_url(
    endpoint: Option<&str>,
    region: &str,
    force_path_style: bool,
    bucket: &str,
    key: &Key,
) -> String {
    match (endpoint, force_path_style) {
        (Some(endpoint), _) => format!("{endpoint}/{bucket}/{key}"),
        (None, true) => format!("https://s3.{region}.amazonaws.com/{bucket}/{key}"),
        (None, false) => format!("https://{bucket}.s3.{region}.amazonaws.com/{key}"),
    }
}

#[async_trait]
impl ObjectStore for S3 {
    async fn put(&self, bucket: &str, key: &Key, body: Bytes) -> Result<CompletedObject> {
        let content_length = body.len();
        let put_object_output = self
            .client
            .put_object()
            .key(key.to_string())
            .body(ByteStream::from(body))
            .content_length(content_length as i64)
            .set_server_side_encryption(self.server_side_encryption.clone())
            .bucket(bucket)
            .send()
            .await?;

        Ok(CompletedObject {
            location: self.object_url(bucket, key),
            e_tag: put_object_output.e_tag().map(str::to_owned),
        })
    }

    async fn initiate_multipart_upload(&self, bucket: &str, key: &Key) -> Result<String> {
        let create_multipart_upload_output = self
            .client
            .create_multipart_upload()
            .key(key.to_string())
            .set_server_side_encryption(self.server_side_encryption.clone())
            .bucket(bucket)
            .send()
            .await?;

        let upload_id = create_multipart_upload_output
            .upload_id()
            .ok_or(Error::ObjectsFailedToInitiateMultipartUpload(
                "missing upload id",
            ))?;

        Ok(upload_id.to_string())
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> Result<Part> {
        if !(1..=MAX_PART_NUMBER).contains(&part_number) {
            return Err(Error::PartNumberOutOfRange(part_number));
        }

        let content_length = body.len();
        let upload_part_output = self
            .client
            .upload_part()
            .upload_id(upload_id)
            .part_number(part_number)
            .key(key.to_string())
            .body(ByteStream::from(body))
            .content_length(content_length as i64)
            .bucket(bucket)
            .send()
            .await?;

        Ok(Part {
            e_tag: upload_part_output.e_tag().map(str::to_owned),
            part_number,
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &Key,
        upload_id: &str,
        parts: Vec<Part>,
    ) -> Result<CompletedObject> {
        let mut mpu = CompletedMultipartUpload::builder();
        for part in parts {
            let mut pb = CompletedPart::builder();
            if let Some(e_tag) = &part.e_tag {
                pb = pb.e_tag(e_tag);
            }
            mpu = mpu.parts(pb.part_number(part.part_number).build());
        }

        let complete_multipart_upload_output = self
            .client
            .complete_multipart_upload()
            .multipart_upload(mpu.build())
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(bucket)
            .send()
            .await?;

        let location = complete_multipart_upload_output
            .location()
            .map(str::to_owned)
            .unwrap_or_else(|| self.object_url(bucket, key));

        Ok(CompletedObject {
            location,
            e_tag: complete_multipart_upload_output.e_tag().map(str::to_owned),
        })
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &Key, upload_id: &str) -> Result<()> {
        let _abort_multipart_upload_output = self
            .client
            .abort_multipart_upload()
            .upload_id(upload_id)
            .key(key.to_string())
            .bucket(bucket)
            .send()
            .await?;
        // TODO: list parts after the abort to catch uploads that were still in flight when it
        // was issued; the SDK docs recommend this for concurrent uploaders.

        Ok(())
    }
}
