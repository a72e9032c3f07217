//! URL 安全的 Base64 編解碼（RFC 4648 §5，無填充），
//! 供 JWS 各部分、JWK thumbprint 與 ARI CertID 使用。

use thiserror::Error;

/// Base64 解碼過程中可能發生的錯誤情形。
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// 當遇到不屬於 URL 安全字元集的字符時返回此錯誤，附帶該字符的 ASCII 值。
    #[error("Invalid character: {0}")]
    InvalidCharacter(u8),

    /// 當輸入長度不可能對應任何位元組序列時（len % 4 == 1）返回此錯誤。
    #[error("Invalid length")]
    InvalidLength,
}

const URL_SAFE_CHARS: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// 將位元組序列編碼為 URL 安全的 Base64 字串（不含 `=` 填充）。
///
/// ACME 協議中所有 base64url 欄位（protected header、payload、signature、
/// thumbprint、CertID）皆使用此格式。
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    let bytes = input.as_ref();
    let mut output = Vec::with_capacity(bytes.len().div_ceil(3) * 4);

    for chunk in bytes.chunks(3) {
        let b1 = chunk[0];
        let b2 = chunk.get(1).copied().unwrap_or(0);
        let b3 = chunk.get(2).copied().unwrap_or(0);

        output.push(URL_SAFE_CHARS[(b1 >> 2) as usize]);
        output.push(URL_SAFE_CHARS[((b1 & 0x03) << 4 | (b2 >> 4)) as usize]);
        if chunk.len() > 1 {
            output.push(URL_SAFE_CHARS[((b2 & 0x0F) << 2 | (b3 >> 6)) as usize]);
        }
        if chunk.len() > 2 {
            output.push(URL_SAFE_CHARS[(b3 & 0x3F) as usize]);
        }
    }

    // 字元表僅含 ASCII，轉換必定成功
    String::from_utf8(output).unwrap_or_default()
}

/// 將 URL 安全的 Base64 字串（可含或不含填充）解碼為原始位元組。
///
/// # 錯誤
///
/// 可能返回 [`DecodeError::InvalidCharacter`] 或 [`DecodeError::InvalidLength`]。
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = input.trim_end_matches('=');
    let bytes = trimmed.as_bytes();
    if bytes.len() % 4 == 1 {
        return Err(DecodeError::InvalidLength);
    }

    let mut buffer = Vec::with_capacity(bytes.len() / 4 * 3 + 2);
    for chunk in bytes.chunks(4) {
        let mut group: u32 = 0;
        for &c in chunk {
            group = group << 6 | decode_char(c)? as u32;
        }
        // 不足 4 字元的尾端區塊左移補齊後再取有效位元組
        group <<= 6 * (4 - chunk.len() as u32);

        buffer.push((group >> 16) as u8);
        if chunk.len() >= 3 {
            buffer.push((group >> 8 & 0xFF) as u8);
        }
        if chunk.len() == 4 {
            buffer.push((group & 0xFF) as u8);
        }
    }

    Ok(buffer)
}

/// 根據 URL 安全 Base64 字符返回其對應的六位元值。
fn decode_char(c: u8) -> Result<u8, DecodeError> {
    match c {
        b'A'..=b'Z' => Ok(c - b'A'),
        b'a'..=b'z' => Ok(c - b'a' + 26),
        b'0'..=b'9' => Ok(c - b'0' + 52),
        b'-' => Ok(62),
        b'_' => Ok(63),
        _ => Err(DecodeError::InvalidCharacter(c)),
    }
}
