//! SOAP envelopes for the bill and consultation services, and a flat reader
//! for their responses.

use std::collections::HashMap;

use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::ProtocolError;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SERVICE_NS: &str = "http://service.sunat.gob.pe";
const WSSE_NS: &str =
    "http://docs.oasis-open.org/wss/2004/01/oasis-200401-wss-wssecurity-secext-1.0.xsd";

/// SOAP operations used by the delivery pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SendBill,
    SendSummary,
    GetStatus,
    GetStatusCdr,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SendBill => "sendBill",
            Operation::SendSummary => "sendSummary",
            Operation::GetStatus => "getStatus",
            Operation::GetStatusCdr => "getStatusCdr",
        }
    }

    pub fn soap_action(&self) -> String {
        format!("urn:{}", self.as_str())
    }
}

fn envelope(username: &str, password: &str, operation: Operation, body: &str) -> String {
    format!(
        concat!(
            r#"<soapenv:Envelope xmlns:soapenv="{env}" xmlns:ser="{service}" xmlns:wsse="{wsse}">"#,
            "<soapenv:Header><wsse:Security><wsse:UsernameToken>",
            "<wsse:Username>{username}</wsse:Username>",
            "<wsse:Password>{password}</wsse:Password>",
            "</wsse:UsernameToken></wsse:Security></soapenv:Header>",
            "<soapenv:Body><ser:{op}>{body}</ser:{op}></soapenv:Body>",
            "</soapenv:Envelope>"
        ),
        env = SOAP_ENV_NS,
        service = SERVICE_NS,
        wsse = WSSE_NS,
        username = escape(username),
        password = escape(password),
        op = operation.as_str(),
        body = body,
    )
}

/// `sendBill` or `sendSummary` carrying a base64 zip archive.
pub fn send_file(
    username: &str,
    password: &str,
    operation: Operation,
    file_name: &str,
    content_base64: &str,
) -> String {
    let body = format!(
        "<fileName>{}</fileName><contentFile>{}</contentFile>",
        escape(file_name),
        content_base64
    );
    envelope(username, password, operation, &body)
}

pub fn get_status(username: &str, password: &str, ticket: &str) -> String {
    let body = format!("<ticket>{}</ticket>", escape(ticket));
    envelope(username, password, Operation::GetStatus, &body)
}

pub fn get_status_cdr(
    username: &str,
    password: &str,
    ruc: &str,
    code: &str,
    serie: &str,
    numero: &str,
) -> String {
    let body = format!(
        concat!(
            "<rucComprobante>{}</rucComprobante>",
            "<tipoComprobante>{}</tipoComprobante>",
            "<serieComprobante>{}</serieComprobante>",
            "<numeroComprobante>{}</numeroComprobante>"
        ),
        escape(ruc),
        escape(code),
        escape(serie),
        escape(numero)
    );
    envelope(username, password, Operation::GetStatusCdr, &body)
}

/// Text content of every element in a document, keyed by local name.
///
/// Responses from the authority are shallow and their element names do not
/// collide, so the nesting is dropped.
#[derive(Debug, Default)]
pub struct XmlFields {
    values: HashMap<String, Vec<String>>,
}

impl XmlFields {
    pub fn parse(xml: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().trim_text(true);

        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut values: HashMap<String, Vec<String>> = HashMap::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    values.entry(name.clone()).or_default();
                    stack.push(name);
                }
                Ok(Event::Empty(e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    values.entry(name).or_default();
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(t)) => {
                    let text = t
                        .unescape()
                        .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
                    if let Some(top) = stack.last() {
                        values.entry(top.clone()).or_default().push(text.into_owned());
                    }
                }
                Ok(Event::CData(c)) => {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    if let Some(top) = stack.last() {
                        values.entry(top.clone()).or_default().push(text);
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => return Err(ProtocolError::Malformed(e.to_string())),
            }
            buf.clear();
        }

        if values.is_empty() {
            return Err(ProtocolError::Malformed("empty document".to_string()));
        }

        Ok(Self { values })
    }

    /// Whether an element with this local name appeared.
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// First non-empty text of the element.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.values
            .get(name)?
            .iter()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
    }

    /// Every text of the element, in document order.
    pub fn all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The SOAP fault carried by this response, if any.
    pub fn fault(&self) -> Option<SoapFault> {
        if !self.contains("Fault") {
            return None;
        }
        Some(SoapFault {
            code: self.first("faultcode").unwrap_or_default().to_string(),
            message: self
                .first("faultstring")
                .or_else(|| self.first("message"))
                .unwrap_or_default()
                .to_string(),
            detail: self.first("message").map(str::to_string),
        })
    }
}

/// A SOAP 1.1 fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// `faultcode`, e.g. `soap-env:Client.0111`.
    pub code: String,
    /// `faultstring`.
    pub message: String,
    /// `detail/message`, when the authority supplies one.
    pub detail: Option<String>,
}

impl SoapFault {
    /// Numeric error code from the fault code suffix, else from the fault string.
    pub fn numeric_code(&self) -> Option<u32> {
        let suffix = self.code.rsplit(|c| c == '.' || c == ':').next().unwrap_or_default();
        parse_code(suffix).or_else(|| parse_code(&self.message))
    }

    /// Human-readable description for diagnostics.
    pub fn description(&self) -> String {
        match &self.detail {
            Some(detail) if *detail != self.message => format!("{} ({})", detail, self.message),
            _ => self.message.clone(),
        }
    }
}

fn parse_code(value: &str) -> Option<u32> {
    let value = value.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}
