// Nebula: content-addressed document repository
//
// SPDX-License-Identifier: Apache-2.0
//
// A minimal, deterministic text notation for documents and contracts: sorted `key: value` lines,
// one attribute per line, blank-line separated sections. Not the external "bali" grammar — that
// parser/serializer is a collaborator this crate does not reimplement — but stable under the same
// round-trip law (`parse(serialize(x)) = x`, `serialize(parse(s)) = s`) that the wire format
// requires (§6, §8).

use std::collections::BTreeMap;

use crate::citation::{Citation, Name, Tag, Version};
use crate::document::{Content, Contract, Document, DocumentParameters, Permissions};
use crate::error::{RepoError, RepoResult};

fn encode_kv(out: &mut String, key: &str, value: &str) {
    out.push_str(key);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn encode_content(out: &mut String, content: &Content) {
    for (k, v) in content {
        encode_kv(out, &format!("content.{k}"), v);
    }
}

fn encode_params(out: &mut String, params: &DocumentParameters) {
    encode_kv(out, "tag", &params.tag.to_string());
    encode_kv(out, "version", &params.version.to_string());
    encode_kv(out, "type", params.doc_type.as_str());
    encode_kv(out, "owner", &params.permissions.owner);
    encode_kv(out, "public", &params.permissions.public.to_string());
    if let Some(previous) = &params.previous {
        encode_kv(out, "previous", &previous.to_string());
    }
    if let Some(bag) = &params.bag {
        encode_kv(out, "bag", &bag.to_string());
    }
}

/// Canonical text for a [`Document`] — used both to store drafts and as the input the notary
/// digests when citing or notarizing.
pub fn encode_document(doc: &Document) -> String {
    let mut out = String::new();
    encode_params(&mut out, &doc.parameters);
    encode_content(&mut out, &doc.content);
    out
}

/// Canonical text for a [`Contract`], including its certificate citation and signature.
pub fn encode_contract(contract: &Contract) -> String {
    let mut out = encode_document(&contract.document);
    match &contract.certificate {
        Some(cert) => encode_kv(&mut out, "certificate", &cert.to_string()),
        None => encode_kv(&mut out, "certificate", "~"),
    }
    encode_kv(&mut out, "signature", &hex::encode(&contract.signature));
    out
}

fn parse_lines(text: &str) -> RepoResult<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for line in text.lines() {
        if line.is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(": ")
            .ok_or_else(|| RepoError::MalformedRequest(format!("malformed record line: {line:?}")))?;
        map.insert(key.to_owned(), value.to_owned());
    }
    Ok(map)
}

fn parse_citation(text: &str) -> RepoResult<Citation> {
    text.parse().map_err(|e| RepoError::MalformedRequest(format!("{e}")))
}

/// Parses a document previously produced by [`encode_document`].
pub fn decode_document(text: &str) -> RepoResult<Document> {
    let fields = parse_lines(text)?;
    let get = |k: &str| -> RepoResult<&String> {
        fields
            .get(k)
            .ok_or_else(|| RepoError::MalformedRequest(format!("missing field {k:?}")))
    };
    let tag: Tag = get("tag")?.parse().map_err(|e| RepoError::MalformedRequest(format!("{e}")))?;
    let version: Version = get("version")?.parse().map_err(|e| RepoError::MalformedRequest(format!("{e}")))?;
    let doc_type: Name = get("type")?.parse().map_err(|e| RepoError::MalformedRequest(format!("{e}")))?;
    let owner = get("owner")?.clone();
    let public = get("public")?.parse::<bool>().map_err(|_| RepoError::MalformedRequest("bad public flag".into()))?;
    let previous = match fields.get("previous") {
        Some(v) => Some(parse_citation(v)?),
        None => None,
    };
    let bag = match fields.get("bag") {
        Some(v) => Some(parse_citation(v)?),
        None => None,
    };
    let mut content = Content::new();
    for (k, v) in &fields {
        if let Some(attr) = k.strip_prefix("content.") {
            content.insert(attr.to_owned(), v.clone());
        }
    }
    Ok(Document {
        content,
        parameters: DocumentParameters {
            tag,
            version,
            doc_type,
            permissions: Permissions { owner, public },
            previous,
            bag,
        },
    })
}

/// Parses a contract previously produced by [`encode_contract`].
pub fn decode_contract(text: &str) -> RepoResult<Contract> {
    let fields = parse_lines(text)?;
    let document = decode_document(text)?;
    let certificate = match fields.get("certificate").map(String::as_str) {
        Some("~") | None => None,
        Some(other) => Some(parse_citation(other)?),
    };
    let signature = fields
        .get("signature")
        .map(|s| hex::decode(s).map_err(|_| RepoError::MalformedRequest("bad signature hex".into())))
        .transpose()?
        .unwrap_or_default();
    Ok(Contract { document, certificate, signature })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_document() -> Document {
        let mut doc = Document::new("/acme/orders/v1".parse().unwrap(), Permissions::public("alice"));
        doc.content.insert("total".into(), "42".into());
        doc
    }

    #[test]
    fn document_round_trips_through_text() {
        let doc = sample_document();
        let text = encode_document(&doc);
        let parsed = decode_document(&text).unwrap();
        assert_eq!(doc, parsed);
        assert_eq!(encode_document(&parsed), text);
    }

    #[test]
    fn contract_round_trips_through_text() {
        let doc = sample_document();
        let contract = Contract { document: doc, certificate: None, signature: vec![1, 2, 3] };
        let text = encode_contract(&contract);
        let parsed = decode_contract(&text).unwrap();
        assert_eq!(contract, parsed);
        assert_eq!(encode_contract(&parsed), text);
    }
}
