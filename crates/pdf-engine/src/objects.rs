//! Small helpers over `lopdf` objects

use lopdf::{Dictionary, Document, Object, ObjectId, StringFormat};

/// Follow a reference one level; direct objects are returned as-is
pub(crate) fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Option<&'a Object> {
    match object {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

pub(crate) fn number(object: &Object) -> Option<f64> {
    object.as_float().ok().map(f64::from)
}

/// Numeric array, references resolved
pub(crate) fn numbers(doc: &Document, object: &Object) -> Option<Vec<f64>> {
    let array = resolve(doc, object)?.as_array().ok()?;
    array
        .iter()
        .map(|item| resolve(doc, item).and_then(number))
        .collect()
}

/// Look up a page attribute, walking `/Parent` for inheritable keys
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = Some(page_id);
    // Bounded walk; malformed trees can loop
    for _ in 0..64 {
        let dict = doc.get_dictionary(current?).ok()?;
        if let Ok(value) = dict.get(key) {
            return resolve(doc, value);
        }
        current = dict.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}

pub(crate) fn dict_text(doc: &Document, dict: &Dictionary, key: &[u8]) -> Option<String> {
    let object = resolve(doc, dict.get(key).ok()?)?;
    let bytes = object.as_str().ok()?;
    Some(decode_text_string(bytes))
}

pub(crate) fn dict_name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    dict.get(key).and_then(Object::as_name).ok()
}

pub(crate) fn real(value: f64) -> Object {
    Object::Real(value as f32)
}

pub(crate) fn name(value: &str) -> Object {
    Object::Name(value.as_bytes().to_vec())
}

pub(crate) fn reals(values: impl IntoIterator<Item = f64>) -> Object {
    Object::Array(values.into_iter().map(real).collect())
}

/// PDF text string: literal when ASCII, UTF-16BE with BOM otherwise
pub(crate) fn text_string(value: &str) -> Object {
    if value.is_ascii() {
        return Object::String(value.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in value.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    Object::String(bytes, StringFormat::Hexadecimal)
}

pub(crate) fn decode_text_string(bytes: &[u8]) -> String {
    match bytes {
        [0xFE, 0xFF, rest @ ..] => {
            let units: Vec<u16> = rest
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        // PDFDocEncoding matches Latin-1 for printable text
        _ => bytes.iter().map(|&b| char::from(b)).collect(),
    }
}
