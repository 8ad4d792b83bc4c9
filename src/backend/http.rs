use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use url::Url;

use super::{BackendAdapter, BackendError, SearchFilter};
use crate::binding::{Payload, Record};
use crate::export::staleness::format_backend_date;

/// JSON adapter for one REST resource of the backend.
///
/// `GET {base}/{resource}/{id}?fields=a,b`, `POST {base}/{resource}`,
/// `PUT {base}/{resource}/{id}?storeview={code}` and, for searches,
/// `GET {base}/{resource}?updated_from=..&updated_to=..&type_id=..` answering a list
/// of ids or of objects with an `id` member. Create responses must carry the new
/// id in an `id` member. A 404 on read maps to [`BackendError::IdMissing`].
pub struct HttpAdapter {
	client: Client,
	base_url: Url,
	resource: String,
	token: Option<String>,
}

impl HttpAdapter {
	pub fn new(
		base_url: Url,
		resource: impl Into<String>,
		token: Option<String>,
		timeout: Duration,
	) -> Result<Self, BackendError> {
		let client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			client,
			base_url,
			resource: resource.into(),
			token,
		})
	}

	/// Build with a shared client so adapters for several resources reuse one pool.
	pub fn with_client(
		client: Client,
		base_url: Url,
		resource: impl Into<String>,
		token: Option<String>,
	) -> Self {
		Self {
			client,
			base_url,
			resource: resource.into(),
			token,
		}
	}

	fn url(&self, remote_id: Option<&str>) -> Result<Url, BackendError> {
		let mut url = self.base_url.clone();
		{
			let mut segments = url.path_segments_mut().map_err(|_| {
				BackendError::InvalidResponse(format!("base url {} cannot hold a path", self.base_url))
			})?;
			segments.pop_if_empty();
			segments.extend(self.resource.split('/').filter(|s| !s.is_empty()));
			if let Some(id) = remote_id {
				segments.push(id);
			}
		}
		Ok(url)
	}

	fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
		match &self.token {
			Some(token) => req.bearer_auth(token),
			None => req,
		}
	}
}

async fn check(resp: Response) -> Result<Response, BackendError> {
	let status = resp.status();
	if status.is_success() {
		return Ok(resp);
	}
	let body = resp.text().await.unwrap_or_default();
	Err(BackendError::Rejected {
		status: status.as_u16(),
		body,
	})
}

fn search_ids(body: Value) -> Result<Vec<String>, BackendError> {
	let Value::Array(items) = body else {
		return Err(BackendError::InvalidResponse(format!(
			"expected a list of ids, got {}",
			body
		)));
	};
	items
		.iter()
		.map(|item| match item {
			Value::String(s) if !s.is_empty() => Ok(s.clone()),
			Value::Number(n) => Ok(n.to_string()),
			other => remote_id_from(other),
		})
		.collect()
}

fn remote_id_from(body: &Value) -> Result<String, BackendError> {
	match body.get("id") {
		Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
		Some(Value::Number(n)) => Ok(n.to_string()),
		_ => Err(BackendError::InvalidResponse(format!(
			"create response carries no id: {}",
			body
		))),
	}
}

#[async_trait]
impl BackendAdapter for HttpAdapter {
	async fn read(&self, remote_id: &str, attributes: &[&str]) -> Result<Record, BackendError> {
		let mut url = self.url(Some(remote_id))?;
		if !attributes.is_empty() {
			url.query_pairs_mut()
				.append_pair("fields", &attributes.join(","));
		}
		debug!("GET {}", url);
		let resp = self.authorize(self.client.get(url)).send().await?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Err(BackendError::IdMissing(remote_id.to_string()));
		}
		let body: Value = check(resp).await?.json().await?;
		match body {
			Value::Object(map) => Ok(map),
			other => Err(BackendError::InvalidResponse(format!(
				"expected an object for {} {}, got {}",
				self.resource, remote_id, other
			))),
		}
	}

	async fn create(&self, data: &Payload) -> Result<String, BackendError> {
		let url = self.url(None)?;
		debug!("POST {}", url);
		let resp = self.authorize(self.client.post(url)).json(data).send().await?;
		let body: Value = check(resp).await?.json().await?;
		remote_id_from(&body)
	}

	async fn search(&self, filter: &SearchFilter) -> Result<Vec<String>, BackendError> {
		let mut url = self.url(None)?;
		{
			let mut query = url.query_pairs_mut();
			if let Some(from) = filter.updated_from {
				query.append_pair("updated_from", &format_backend_date(from));
			}
			if let Some(to) = filter.updated_to {
				query.append_pair("updated_to", &format_backend_date(to));
			}
			if let Some(type_id) = &filter.type_id {
				query.append_pair("type_id", type_id);
			}
		}
		debug!("GET {}", url);
		let resp = self.authorize(self.client.get(url)).send().await?;
		let body: Value = check(resp).await?.json().await?;
		search_ids(body)
	}

	async fn write(
		&self,
		remote_id: &str,
		data: &Payload,
		storeview: Option<&str>,
	) -> Result<(), BackendError> {
		let mut url = self.url(Some(remote_id))?;
		if let Some(code) = storeview {
			url.query_pairs_mut().append_pair("storeview", code);
		}
		debug!("PUT {}", url);
		let resp = self.authorize(self.client.put(url)).json(data).send().await?;
		if resp.status() == StatusCode::NOT_FOUND {
			return Err(BackendError::IdMissing(remote_id.to_string()));
		}
		check(resp).await?;
		Ok(())
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use serde_json::json;

	fn adapter(base: &str) -> HttpAdapter {
		HttpAdapter::new(
			Url::parse(base).unwrap(),
			"products",
			None,
			Duration::from_secs(5),
		)
		.unwrap()
	}

	#[test]
	fn url_joins_resource_and_id() {
		let a = adapter("https://shop.example.com/rest/V1/");
		assert_eq!(
			a.url(Some("42")).unwrap().as_str(),
			"https://shop.example.com/rest/V1/products/42"
		);
		assert_eq!(
			a.url(None).unwrap().as_str(),
			"https://shop.example.com/rest/V1/products"
		);
	}

	#[test]
	fn remote_id_accepts_numbers_and_strings() {
		assert_eq!(remote_id_from(&json!({"id": 17})).unwrap(), "17");
		assert_eq!(remote_id_from(&json!({"id": "SKU-1"})).unwrap(), "SKU-1");
		assert!(matches!(
			remote_id_from(&json!({"sku": "x"})),
			Err(BackendError::InvalidResponse(_))
		));
	}

	#[test]
	fn search_accepts_ids_and_objects() {
		assert_eq!(
			search_ids(json!([12, "13", {"id": 14}])).unwrap(),
			vec!["12", "13", "14"]
		);
		assert!(search_ids(json!({"items": []})).is_err());
	}
}
