// reqwest-backed HttpClient

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart;

use super::{HttpClient, HttpRequest, HttpResponse, Method, RequestBody, TransportError};

pub struct ReqwestClient {
    http: reqwest::Client,
}

impl ReqwestClient {
    /// Client whose requests give up after `timeout`
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    pub fn from_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(body) => builder.json(&body),
            RequestBody::Form(fields) => builder.form(&fields),
            RequestBody::Multipart { field, file } => {
                let part = multipart::Part::bytes(file.bytes.to_vec())
                    .file_name(file.filename)
                    .mime_str(&file.content_type)?;
                builder.multipart(multipart::Form::new().part(field, part))
            }
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse::new(status, body))
    }
}
