//! Testing utilities and test doubles for delivery tests.
//!
//! This module provides in-process implementations of the external
//! collaborators, allowing the whole pipeline to run without a tax authority,
//! a signing service, or a disk.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier_core::testing::{fixtures, MemoryBlobStore, MockSender};
//! use courier_core::sender::{Failure, FailureKind, SubmitOutcome};
//!
//! let sender = MockSender::new();
//! sender
//!     .push_submit(SubmitOutcome::Retryable(Failure::ambiguous(
//!         FailureKind::Timeout,
//!         "timed out",
//!     )))
//!     .await;
//!
//! let blobs = MemoryBlobStore::new();
//! let xml = fixtures::invoice_xml("20123456789", "F001-1");
//! ```

mod memory_blob_store;
mod mock_sender;
mod mock_signer;

pub use memory_blob_store::MemoryBlobStore;
pub use mock_sender::{MockSender, RecordedCall, SenderCall};
pub use mock_signer::PassthroughSigner;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::io::{Cursor, Write};

    use quick_xml::escape::escape;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    use crate::config::{Config, SenderConfig, SenderSection};
    use crate::sender::{Receipt, Rejection};

    const UBL_NAMESPACES: &str = concat!(
        r#"xmlns:cac="urn:oasis:names:specification:ubl:schema:xsd:CommonAggregateComponents-2" "#,
        r#"xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2" "#,
        r#"xmlns:ds="http://www.w3.org/2000/09/xmldsig#" "#,
        r#"xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2""#
    );

    const SIGNATURE_EXTENSION: &str = concat!(
        "<ext:UBLExtensions><ext:UBLExtension><ext:ExtensionContent>",
        r#"<ds:Signature Id="SignatureSP"><ds:SignedInfo>"#,
        r#"<ds:Reference URI=""><ds:DigestValue>2jmj7l5rSw0yVb/vlWAYkK/YBwk=</ds:DigestValue></ds:Reference>"#,
        "</ds:SignedInfo><ds:SignatureValue>c2lnbmF0dXJl</ds:SignatureValue></ds:Signature>",
        "</ext:ExtensionContent></ext:UBLExtension></ext:UBLExtensions>"
    );

    /// A signed invoice (factura, type code 01) issued by `ruc`.
    pub fn invoice_xml(ruc: &str, id: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" {ns}>"#,
                "{ext}",
                "<cbc:UBLVersionID>2.1</cbc:UBLVersionID>",
                "<cbc:CustomizationID>2.0</cbc:CustomizationID>",
                "<cbc:ID>{id}</cbc:ID>",
                "<cbc:IssueDate>2024-01-15</cbc:IssueDate>",
                "<cbc:InvoiceTypeCode>01</cbc:InvoiceTypeCode>",
                "<cbc:DocumentCurrencyCode>PEN</cbc:DocumentCurrencyCode>",
                "<cac:Signature><cbc:ID>SIGN-{ruc}</cbc:ID><cac:SignatoryParty>",
                "<cac:PartyIdentification><cbc:ID>{ruc}</cbc:ID></cac:PartyIdentification>",
                "<cac:PartyName><cbc:Name>ACME S.A.C.</cbc:Name></cac:PartyName>",
                "</cac:SignatoryParty></cac:Signature>",
                "<cac:AccountingSupplierParty><cac:Party>",
                r#"<cac:PartyIdentification><cbc:ID schemeID="6">{ruc}</cbc:ID></cac:PartyIdentification>"#,
                "<cac:PartyLegalEntity><cbc:RegistrationName>ACME S.A.C.</cbc:RegistrationName></cac:PartyLegalEntity>",
                "</cac:Party></cac:AccountingSupplierParty>",
                "<cac:AccountingCustomerParty><cac:Party>",
                r#"<cac:PartyIdentification><cbc:ID schemeID="6">20999999999</cbc:ID></cac:PartyIdentification>"#,
                "</cac:Party></cac:AccountingCustomerParty>",
                "<cac:LegalMonetaryTotal>",
                r#"<cbc:PayableAmount currencyID="PEN">118.00</cbc:PayableAmount>"#,
                "</cac:LegalMonetaryTotal>",
                "</Invoice>"
            ),
            ns = UBL_NAMESPACES,
            ext = SIGNATURE_EXTENSION,
            id = id,
            ruc = ruc,
        )
    }

    /// A signed daily summary of boletas issued by `ruc`.
    pub fn summary_xml(ruc: &str, id: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<SummaryDocuments xmlns="urn:sunat:names:specification:ubl:peru:schema:xsd:SummaryDocuments-1" {ns}>"#,
                "{ext}",
                "<cbc:UBLVersionID>2.0</cbc:UBLVersionID>",
                "<cbc:CustomizationID>1.1</cbc:CustomizationID>",
                "<cbc:ID>{id}</cbc:ID>",
                "<cbc:ReferenceDate>2024-01-15</cbc:ReferenceDate>",
                "<cbc:IssueDate>2024-01-16</cbc:IssueDate>",
                "<cac:AccountingSupplierParty>",
                "<cbc:CustomerAssignedAccountID>{ruc}</cbc:CustomerAssignedAccountID>",
                "<cbc:AdditionalAccountID>6</cbc:AdditionalAccountID>",
                "</cac:AccountingSupplierParty>",
                "<sac:SummaryDocumentsLine xmlns:sac=\"urn:sunat:names:specification:ubl:peru:schema:xsd:SunatAggregateComponents-1\">",
                "<cbc:LineID>1</cbc:LineID><cbc:DocumentTypeCode>03</cbc:DocumentTypeCode>",
                "<cbc:ID>B001-1</cbc:ID>",
                "</sac:SummaryDocumentsLine>",
                "</SummaryDocuments>"
            ),
            ns = UBL_NAMESPACES,
            ext = SIGNATURE_EXTENSION,
            id = id,
            ruc = ruc,
        )
    }

    /// A signed voided-documents batch issued by `ruc`.
    pub fn voided_xml(ruc: &str, id: &str) -> String {
        format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<VoidedDocuments xmlns="urn:sunat:names:specification:ubl:peru:schema:xsd:VoidedDocuments-1" {ns}>"#,
                "{ext}",
                "<cbc:UBLVersionID>2.0</cbc:UBLVersionID>",
                "<cbc:CustomizationID>1.0</cbc:CustomizationID>",
                "<cbc:ID>{id}</cbc:ID>",
                "<cbc:ReferenceDate>2024-01-15</cbc:ReferenceDate>",
                "<cbc:IssueDate>2024-01-16</cbc:IssueDate>",
                "<cac:AccountingSupplierParty>",
                "<cbc:CustomerAssignedAccountID>{ruc}</cbc:CustomerAssignedAccountID>",
                "<cbc:AdditionalAccountID>6</cbc:AdditionalAccountID>",
                "</cac:AccountingSupplierParty>",
                "<sac:VoidedDocumentsLine xmlns:sac=\"urn:sunat:names:specification:ubl:peru:schema:xsd:SunatAggregateComponents-1\">",
                "<cbc:LineID>1</cbc:LineID><cbc:DocumentTypeCode>01</cbc:DocumentTypeCode>",
                "<sac:DocumentSerialID>F001</sac:DocumentSerialID>",
                "<sac:DocumentNumberID>1</sac:DocumentNumberID>",
                "<sac:VoidReasonDescription>Error en datos</sac:VoidReasonDescription>",
                "</sac:VoidedDocumentsLine>",
                "</VoidedDocuments>"
            ),
            ns = UBL_NAMESPACES,
            ext = SIGNATURE_EXTENSION,
            id = id,
            ruc = ruc,
        )
    }

    /// A zipped receipt (CDR) for the document archived as `stem`.
    ///
    /// Codes of 4000 and above also get a matching observation note.
    pub fn cdr_zip(stem: &str, code: u32, description: &str) -> Vec<u8> {
        let note = if code >= 4000 {
            format!("<cbc:Note>{} - {}</cbc:Note>", code, escape(description))
        } else {
            String::new()
        };
        let xml = format!(
            concat!(
                r#"<?xml version="1.0" encoding="UTF-8"?>"#,
                r#"<ar:ApplicationResponse xmlns:ar="urn:oasis:names:specification:ubl:schema:xsd:ApplicationResponse-2" {ns}>"#,
                "<cbc:UBLVersionID>2.0</cbc:UBLVersionID>",
                "<cbc:ID>1705352400000</cbc:ID>",
                "<cbc:IssueDate>2024-01-15</cbc:IssueDate>",
                "{note}",
                "<cac:DocumentResponse><cac:Response>",
                "<cbc:ReferenceID>{stem}</cbc:ReferenceID>",
                "<cbc:ResponseCode>{code}</cbc:ResponseCode>",
                "<cbc:Description>{description}</cbc:Description>",
                "</cac:Response></cac:DocumentResponse>",
                "</ar:ApplicationResponse>"
            ),
            ns = UBL_NAMESPACES,
            note = note,
            stem = escape(stem),
            code = code,
            description = escape(description),
        );

        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.add_directory("dummy/", options).unwrap();
        writer
            .start_file(format!("R-{}.xml", stem), options)
            .unwrap();
        writer.write_all(xml.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    /// An acceptance receipt for `stem`.
    pub fn receipt(stem: &str) -> Receipt {
        Receipt {
            response_code: 0,
            description: format!("El comprobante {} ha sido aceptado", stem),
            notes: Vec::new(),
            cdr: cdr_zip(stem, 0, "aceptado"),
        }
    }

    /// A rejection with a receipt attached.
    pub fn rejection(stem: &str, code: u32, message: &str) -> Rejection {
        Rejection {
            code,
            message: message.to_string(),
            cdr: Some(cdr_zip(stem, code, message)),
        }
    }

    /// Sender settings pointing at `base_url`.
    pub fn sender_config(base_url: &str) -> SenderConfig {
        let base = base_url.trim_end_matches('/');
        SenderConfig {
            factura_url: format!("{}/billService", base),
            guia_remision_url: Some(format!("{}/despatchService", base)),
            percepcion_retencion_url: Some(format!("{}/retentionService", base)),
            consulta_url: Some(format!("{}/billConsultService", base)),
            username: "20123456789MODDATOS".to_string(),
            password: "moddatos".to_string(),
        }
    }

    /// A complete configuration whose sender points at `base_url`.
    pub fn config(base_url: &str) -> Config {
        Config {
            server: Default::default(),
            database: Default::default(),
            storage: Default::default(),
            numbering: Default::default(),
            scheduler: Default::default(),
            sender: SenderSection {
                timeout_secs: 5,
                default: sender_config(base_url),
                namespaces: Default::default(),
            },
        }
    }
}
