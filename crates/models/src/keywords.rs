//! Length-prefixed binary encoding of a monitor's keyword list: a 2-byte LE
//! keyword count, then each keyword as a 2-byte LE length followed by its raw
//! bytes. The store compresses the result before persisting it.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum KeywordBlobError {
    #[error("keyword blob is shorter than its header")]
    TruncatedHeader,
    #[error("keyword {index} overruns the blob")]
    TruncatedKeyword { index: usize },
    #[error("keyword blob has {0} trailing bytes")]
    TrailingBytes(usize),
}

pub fn encode_keywords(keywords: &[Vec<u8>]) -> Vec<u8> {
    let total = 2 + keywords.iter().map(|k| 2 + k.len()).sum::<usize>();
    let mut blob = Vec::with_capacity(total);

    blob.extend_from_slice(&(keywords.len() as u16).to_le_bytes());
    for keyword in keywords {
        blob.extend_from_slice(&(keyword.len() as u16).to_le_bytes());
        blob.extend_from_slice(keyword);
    }

    blob
}

pub fn decode_keywords(blob: &[u8]) -> Result<Vec<Vec<u8>>, KeywordBlobError> {
    if blob.len() < 2 {
        return Err(KeywordBlobError::TruncatedHeader);
    }

    let count = u16::from_le_bytes([blob[0], blob[1]]) as usize;
    let mut keywords = Vec::with_capacity(count);
    let mut offset = 2;

    for index in 0..count {
        if blob.len() < offset + 2 {
            return Err(KeywordBlobError::TruncatedKeyword { index });
        }
        let length = u16::from_le_bytes([blob[offset], blob[offset + 1]]) as usize;
        offset += 2;

        if blob.len() < offset + length {
            return Err(KeywordBlobError::TruncatedKeyword { index });
        }
        keywords.push(blob[offset..offset + length].to_vec());
        offset += length;
    }

    if offset != blob.len() {
        return Err(KeywordBlobError::TrailingBytes(blob.len() - offset));
    }

    Ok(keywords)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips() {
        for keywords in [
            vec![],
            vec![b"error".to_vec()],
            vec![b"error".to_vec(), b"".to_vec(), vec![0u8, 255, 13]],
        ] {
            let blob = encode_keywords(&keywords);
            assert_eq!(decode_keywords(&blob).unwrap(), keywords);
        }
    }

    #[test]
    fn empty_list_is_two_zero_bytes() {
        assert_eq!(encode_keywords(&[]), vec![0, 0]);
    }

    #[test]
    fn rejects_truncation() {
        assert_eq!(decode_keywords(&[]), Err(KeywordBlobError::TruncatedHeader));
        assert_eq!(
            decode_keywords(&[5]),
            Err(KeywordBlobError::TruncatedHeader)
        );

        let mut blob = encode_keywords(&[b"keyword".to_vec()]);
        blob.pop();
        assert_eq!(
            decode_keywords(&blob),
            Err(KeywordBlobError::TruncatedKeyword { index: 0 })
        );

        // Declared count larger than the payload carries.
        assert_eq!(
            decode_keywords(&[2, 0, 1, 0, b'x']),
            Err(KeywordBlobError::TruncatedKeyword { index: 1 })
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        let mut blob = encode_keywords(&[b"keyword".to_vec()]);
        blob.push(0);
        assert_eq!(decode_keywords(&blob), Err(KeywordBlobError::TrailingBytes(1)));
    }
}
