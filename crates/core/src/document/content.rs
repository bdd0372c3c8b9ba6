//! Extraction of the delivery-relevant fields from a signed UBL document.

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

use super::types::{DocumentType, UnsupportedDocumentType};

/// Elements that wrap the issuer of each document family.
const SUPPLIER_PARTIES: [&str; 3] = [
    "AccountingSupplierParty",
    "AgentParty",
    "DespatchSupplierParty",
];

#[derive(Debug, Error)]
pub enum ContentError {
    #[error(transparent)]
    Unsupported(#[from] UnsupportedDocumentType),

    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("missing required element: {0}")]
    MissingElement(&'static str),
}

/// What the delivery pipeline needs to know about a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentContent {
    pub document_type: DocumentType,
    /// Document identifier, e.g. `F001-1` or `RC-20240101-1`.
    pub document_id: String,
    /// Issuer taxpayer id (RUC).
    pub taxpayer_id: String,
    /// `InvoiceTypeCode` when present (01 factura, 03 boleta).
    pub invoice_type_code: Option<String>,
}

impl DocumentContent {
    /// Catalog code used when naming the archive and consulting receipts.
    pub fn catalog_code(&self) -> Option<&str> {
        match (self.document_type, &self.invoice_type_code) {
            (DocumentType::Invoice, Some(code)) => Some(code.as_str()),
            _ => self.document_type.catalog_code(),
        }
    }

    /// Base name shared by the archive and its XML entry.
    pub fn file_stem(&self) -> String {
        match self.catalog_code() {
            Some(code) => format!("{}-{}-{}", self.taxpayer_id, code, self.document_id),
            None => format!("{}-{}", self.taxpayer_id, self.document_id),
        }
    }

    /// Split `F001-123` into its serie and numero.
    pub fn serie_and_numero(&self) -> Option<(&str, &str)> {
        self.document_id.rsplit_once('-')
    }

    /// Voided-document batches for perceptions and retentions use the `RR` prefix.
    pub fn is_perception_retention_voided(&self) -> bool {
        self.document_type == DocumentType::VoidedDocuments && self.document_id.starts_with("RR-")
    }
}

/// Parse a signed UBL document.
pub fn analyze(xml: &[u8]) -> Result<DocumentContent, ContentError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut document_type: Option<DocumentType> = None;
    let mut document_id: Option<String> = None;
    let mut supplier_id: Option<String> = None;
    let mut signatory_id: Option<String> = None;
    let mut invoice_type_code: Option<String> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if stack.is_empty() {
                    document_type = Some(DocumentType::from_root_element(&name)?);
                }
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                if stack.is_empty() {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    DocumentType::from_root_element(&name)?;
                }
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t
                    .unescape()
                    .map_err(|e| ContentError::Malformed(e.to_string()))?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let depth = stack.len();
                let top = stack.last().map(String::as_str);
                let parent = depth
                    .checked_sub(2)
                    .and_then(|i| stack.get(i))
                    .map(String::as_str);

                if depth == 2 && top == Some("ID") && document_id.is_none() {
                    document_id = Some(text.to_string());
                } else if depth == 2 && top == Some("InvoiceTypeCode") {
                    invoice_type_code = Some(text.to_string());
                } else if supplier_id.is_none()
                    && stack.iter().any(|n| SUPPLIER_PARTIES.contains(&n.as_str()))
                    && is_party_id(top, parent)
                {
                    supplier_id = Some(text.to_string());
                } else if signatory_id.is_none()
                    && stack.iter().any(|n| n == "SignatoryParty")
                    && is_party_id(top, parent)
                {
                    signatory_id = Some(text.to_string());
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(ContentError::Malformed(e.to_string())),
        }
        buf.clear();
    }

    let document_type = document_type.ok_or(ContentError::MissingElement("root element"))?;
    let document_id = document_id.ok_or(ContentError::MissingElement("cbc:ID"))?;
    let taxpayer_id = supplier_id
        .or(signatory_id)
        .ok_or(ContentError::MissingElement("supplier party identification"))?;

    Ok(DocumentContent {
        document_type,
        document_id,
        taxpayer_id,
        invoice_type_code,
    })
}

fn is_party_id(top: Option<&str>, parent: Option<&str>) -> bool {
    match top {
        Some("CustomerAssignedAccountID") => true,
        Some("ID") => parent == Some("PartyIdentification"),
        _ => false,
    }
}
