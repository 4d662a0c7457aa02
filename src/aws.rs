use crate::credentials::{self, Credential};
use crate::error::Ec2Error;
use crate::prelude::*;
use crate::xml::{self, TagPath, TagPattern, XmlHandler};
use aws_sigv4::http_request::{sign, SignableRequest, SigningParams, SigningSettings};
use http::request::Parts;
use http::Request;
use itertools::Itertools;
use log::{debug, trace};
use minreq::{Response, URL};
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

/// A query API call: the action name plus its flattened parameters, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ec2Request {
    pub action: String,
    pub params: Vec<(String, String)>,
}

impl fmt::Display for Ec2Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Action={}", self.action)?;
        self.params.iter().try_for_each(|(k, v)| write!(f, "\n{k}={v}"))
    }
}

pub fn generate_request<K, V>(action: &str, params: impl IntoIterator<Item = (K, V)>) -> Ec2Request
where
    K: Into<String>,
    V: ToString,
{
    let params = params.into_iter().map(|(k, v)| (k.into(), v.to_string())).collect_vec();
    debug!("{action} with {} params", params.len());
    Ec2Request { action: action.to_string(), params }
}

pub trait Transport {
    /// Sends `req` and returns the body of a successful response.
    fn execute(&self, req: &Ec2Request) -> Result<String>;
}

pub struct SignedTransport {
    pub credential: Credential,
    pub endpoint: String,
    pub api_version: String,
    pub service_name: &'static str,
}

impl SignedTransport {
    pub fn query_string(&self, req: &Ec2Request) -> String {
        [("Action", req.action.as_str()), ("Version", self.api_version.as_str())]
            .into_iter()
            .chain(req.params.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .map(|(k, v)| f!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .join("&")
    }
}

impl Transport for SignedTransport {
    fn execute(&self, req: &Ec2Request) -> Result<String> {
        let url = f!("{}/?{}", self.endpoint, self.query_string(req));
        trace!("GET {url}");
        let res = aws_send(&url, self.service_name, &self.credential)?;
        let body = res.as_str()?;
        if (200..=299).contains(&res.status_code) {
            return Ok(body.to_string());
        }
        if res.status_code == 401 || res.status_code == 403 {
            credentials::clear_cache(&self.credential);
        }
        Err(match xml::parse(body, ErrorResponseParser::default()) {
            Ok(Some(err)) => err.into(),
            _ => Ec2Error::Http { status: res.status_code, reason: res.reason_phrase.clone() }
                .into(),
        })
    }
}

fn aws_sign(
    req: &mut Request<impl AsRef<[u8]>>,
    service_name: &str,
    Credential { access_key, secret, token, region, .. }: &Credential,
) -> Result<()> {
    let signing_settings = SigningSettings::default();
    let mut signing_params = SigningParams::builder()
        .access_key(access_key)
        .secret_key(secret)
        .region(region)
        .service_name(service_name)
        .time(SystemTime::now())
        .settings(signing_settings);
    if !token.is_empty() {
        signing_params = signing_params.security_token(token)
    }
    let signing_params = signing_params.build()?;
    let signable_request = SignableRequest::from(&*req);
    let (signing_instructions, _signature) = sign(signable_request, &signing_params)
        .map_err(|err| eyre!("can't sign request: {err}"))?
        .into_parts();
    signing_instructions.apply_to_request(req);
    Ok(())
}

fn aws_send(url: &str, service_name: &str, cred: &Credential) -> Result<Response> {
    let mut req = Request::builder().uri(url).body("")?;
    aws_sign(&mut req, service_name, cred)?;
    let (parts, _) = req.into_parts();
    let Parts { uri, headers, .. } = parts;
    let mut req = minreq::Request::new(minreq::Method::Get, URL::from_str(&uri.to_string())?);
    for (k, v) in headers.iter() {
        req = req.with_header(k.as_str(), v.to_str()?);
    }
    let res = req.send()?;
    debug!("{service_name} responded {} {}", res.status_code, res.reason_phrase);
    Ok(res)
}

const ERROR_CODE: TagPattern = TagPattern::suffix(&["Error", "Code"]);
const ERROR_MESSAGE: TagPattern = TagPattern::suffix(&["Error", "Message"]);

/// Reads the first `<Error>` of an EC2 (`Response/Errors/Error`) or STS
/// (`ErrorResponse/Error`) error body.
#[derive(Default)]
pub struct ErrorResponseParser {
    result: Option<Ec2Error>,
    code: Option<String>,
    message: Option<String>,
    request_id: String,
}

impl XmlHandler for ErrorResponseParser {
    type Output = Option<Ec2Error>;

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn tag_end(&mut self, path: &TagPath, text: &str) -> Result<()> {
        let text = text.trim().to_string();
        if path.matches(&ERROR_CODE) {
            self.code.get_or_insert(text);
        } else if path.matches(&ERROR_MESSAGE) {
            self.message.get_or_insert(text);
        } else if path.name().eq_ignore_ascii_case("RequestId") {
            self.request_id = text;
        }
        if path.depth() == 1 {
            self.result = self.code.take().map(|code| Ec2Error::Api {
                code,
                message: self.message.take().unwrap_or_default(),
                request_id: std::mem::take(&mut self.request_id),
            });
        }
        Ok(())
    }

    fn result(&self) -> &Self::Output {
        &self.result
    }

    fn into_result(self) -> Self::Output {
        self.result
    }
}
