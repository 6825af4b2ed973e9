//! The DSL helper-function library (spec §4.3). Every function here is a
//! plain `fn(&[Value]) -> Result<Value, DslError>`, dispatched by name from
//! [`call`]. Arity is checked up front so a caller gets a clear error
//! instead of an out-of-bounds panic.

use std::fmt;

use aes::cipher::{BlockEncryptMut, KeyIvInit};
use base64::Engine;
use hmac::Mac;
use rand::Rng;
use sha2::Digest;

use super::value::Value;

#[derive(Debug)]
pub struct DslError(pub String);

impl fmt::Display for DslError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for DslError {}

fn err(msg: impl Into<String>) -> DslError {
    DslError(msg.into())
}

fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), DslError> {
    if args.len() < min || args.len() > max {
        return Err(err(format!(
            "{name}: expected {min}..={max} args, got {}",
            args.len()
        )));
    }
    Ok(())
}

fn s(v: &Value) -> String {
    v.as_str_lossy()
}

fn n(v: &Value, name: &str) -> Result<f64, DslError> {
    v.as_f64().ok_or_else(|| err(format!("{name}: expected numeric argument, got {v:?}")))
}

/// 76-char line-wrapped base64 standard-encoding, shared by the favicon
/// post-processing step (C2) and the `base64_py` DSL function — the Go
/// original's `InsertInto` helper is reused in both places too.
pub fn wrap_base64_76(encoded: &str) -> String {
    let mut out = String::with_capacity(encoded.len() + encoded.len() / 76 + 1);
    for (i, c) in encoded.chars().enumerate() {
        if i > 0 && i % 76 == 0 {
            out.push('\n');
        }
        out.push(c);
    }
    out
}

pub fn call(name: &str, args: &[Value]) -> Result<Value, DslError> {
    match name {
        // ---- string ----
        "len" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Number(s(&args[0]).chars().count() as f64))
        }
        "to_upper" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(s(&args[0]).to_uppercase()))
        }
        "to_lower" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(s(&args[0]).to_lowercase()))
        }
        "sort" => {
            arity(name, args, 1, usize::MAX)?;
            let mut parts: Vec<String> = if args.len() == 1 {
                s(&args[0]).chars().map(|c| c.to_string()).collect()
            } else {
                args.iter().map(s).collect()
            };
            parts.sort();
            Ok(Value::String(parts.concat()))
        }
        "uniq" => {
            arity(name, args, 1, usize::MAX)?;
            let chars: Vec<char> = if args.len() == 1 {
                s(&args[0]).chars().collect()
            } else {
                args.iter().map(|v| s(v).chars().next().unwrap_or(' ')).collect()
            };
            let mut seen = std::collections::BTreeSet::new();
            let out: String = chars.into_iter().filter(|c| seen.insert(*c)).collect();
            Ok(Value::String(out))
        }
        "repeat" => {
            arity(name, args, 2, 2)?;
            let count = n(&args[1], name)? as usize;
            Ok(Value::String(s(&args[0]).repeat(count)))
        }
        "replace" => {
            arity(name, args, 3, 3)?;
            Ok(Value::String(s(&args[0]).replace(&s(&args[1]), &s(&args[2]))))
        }
        "replace_regex" => {
            arity(name, args, 3, 3)?;
            let re = regex::Regex::new(&s(&args[1])).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(re.replace_all(&s(&args[0]), s(&args[2]).as_str()).to_string()))
        }
        "trim" => {
            arity(name, args, 1, 2)?;
            let cutset = args.get(1).map(s);
            Ok(Value::String(match &cutset {
                Some(c) => s(&args[0]).trim_matches(|ch| c.contains(ch)).to_string(),
                None => s(&args[0]).trim().to_string(),
            }))
        }
        "trim_left" => {
            arity(name, args, 1, 2)?;
            let cutset = args.get(1).map(s).unwrap_or_default();
            Ok(Value::String(
                s(&args[0]).trim_start_matches(|c| cutset.contains(c)).to_string(),
            ))
        }
        "trim_right" => {
            arity(name, args, 1, 2)?;
            let cutset = args.get(1).map(s).unwrap_or_default();
            Ok(Value::String(
                s(&args[0]).trim_end_matches(|c| cutset.contains(c)).to_string(),
            ))
        }
        "trim_space" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(s(&args[0]).trim().to_string()))
        }
        "trim_prefix" => {
            arity(name, args, 2, 2)?;
            Ok(Value::String(
                s(&args[0]).strip_prefix(&s(&args[1])).unwrap_or(&s(&args[0])).to_string(),
            ))
        }
        "trim_suffix" => {
            arity(name, args, 2, 2)?;
            Ok(Value::String(
                s(&args[0]).strip_suffix(&s(&args[1])).unwrap_or(&s(&args[0])).to_string(),
            ))
        }
        "reverse" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(s(&args[0]).chars().rev().collect()))
        }
        "concat" => {
            arity(name, args, 0, usize::MAX)?;
            Ok(Value::String(args.iter().map(s).collect()))
        }
        "split" => {
            arity(name, args, 1, 3)?;
            let input = s(&args[0]);
            let sep = args.get(1).map(s).unwrap_or_default();
            let limit = args.get(2).and_then(|v| v.as_f64()).map(|f| f as usize);
            let parts: Vec<&str> = match limit {
                Some(n) if n > 0 => input.splitn(n, sep.as_str()).collect(),
                _ => input.split(sep.as_str()).collect(),
            };
            Ok(Value::List(parts.into_iter().map(|p| Value::String(p.to_string())).collect()))
        }
        "join" => {
            arity(name, args, 1, usize::MAX)?;
            let sep = s(&args[0]);
            Ok(Value::String(args[1..].iter().map(s).collect::<Vec<_>>().join(&sep)))
        }
        "substr" => {
            arity(name, args, 2, 3)?;
            let input: Vec<char> = s(&args[0]).chars().collect();
            let len = input.len() as i64;
            let start = n(&args[1], name)? as i64;
            let start = start.clamp(0, len) as usize;
            let end = match args.get(2) {
                Some(v) => {
                    let mut e = n(v, name)? as i64;
                    if e < 0 {
                        e += len;
                    }
                    e.clamp(0, len) as usize
                }
                None => input.len(),
            };
            let end = end.max(start);
            Ok(Value::String(input[start..end].iter().collect()))
        }
        "starts_with" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(args[1..].iter().any(|p| hay.starts_with(&s(p)))))
        }
        "ends_with" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(args[1..].iter().any(|p| hay.ends_with(&s(p)))))
        }
        "line_starts_with" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(hay.lines().any(|line| args[1..].iter().any(|p| line.starts_with(&s(p))))))
        }
        "line_ends_with" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(hay.lines().any(|line| args[1..].iter().any(|p| line.ends_with(&s(p))))))
        }
        "contains" => {
            arity(name, args, 2, 2)?;
            Ok(Value::Bool(s(&args[0]).contains(&s(&args[1]))))
        }
        "contains_all" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(args[1..].iter().all(|p| hay.contains(&s(p)))))
        }
        "contains_any" => {
            arity(name, args, 2, usize::MAX)?;
            let hay = s(&args[0]);
            Ok(Value::Bool(args[1..].iter().any(|p| hay.contains(&s(p)))))
        }
        "remove_bad_chars" => {
            arity(name, args, 2, 2)?;
            let bad: std::collections::HashSet<char> = s(&args[1]).chars().collect();
            Ok(Value::String(s(&args[0]).chars().filter(|c| !bad.contains(c)).collect()))
        }

        // ---- encoding ----
        "base64" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(base64::engine::general_purpose::STANDARD.encode(s(&args[0]))))
        }
        "base64_decode" => {
            arity(name, args, 1, 1)?;
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(s(&args[0]))
                .map_err(|e| err(e.to_string()))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).to_string()))
        }
        "base64_py" => {
            arity(name, args, 1, 1)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(s(&args[0]));
            Ok(Value::String(wrap_base64_76(&encoded)))
        }
        "url_encode" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(
                percent_encoding::utf8_percent_encode(&s(&args[0]), percent_encoding::NON_ALPHANUMERIC)
                    .to_string(),
            ))
        }
        "url_decode" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(
                percent_encoding::percent_decode_str(&s(&args[0]))
                    .decode_utf8_lossy()
                    .to_string(),
            ))
        }
        "hex_encode" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(hex::encode(s(&args[0]))))
        }
        "hex_decode" => {
            arity(name, args, 1, 1)?;
            let bytes = hex::decode(s(&args[0])).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).to_string()))
        }
        "html_escape" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(html_escape::encode_text(&s(&args[0])).to_string()))
        }
        "html_unescape" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(html_escape::decode_html_entities(&s(&args[0])).to_string()))
        }
        "gzip" => {
            arity(name, args, 1, 1)?;
            use std::io::Write;
            let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(s(&args[0]).as_bytes()).map_err(|e| err(e.to_string()))?;
            let bytes = encoder.finish().map_err(|e| err(e.to_string()))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).to_string()))
        }
        "gzip_decode" => {
            arity(name, args, 1, 1)?;
            use std::io::Read;
            let mut decoder = flate2::read::GzDecoder::new(s(&args[0]).as_bytes());
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(out))
        }
        "zlib" => {
            arity(name, args, 1, 1)?;
            use std::io::Write;
            let mut encoder =
                flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(s(&args[0]).as_bytes()).map_err(|e| err(e.to_string()))?;
            let bytes = encoder.finish().map_err(|e| err(e.to_string()))?;
            Ok(Value::String(String::from_utf8_lossy(&bytes).to_string()))
        }
        "zlib_decode" => {
            arity(name, args, 1, 1)?;
            use std::io::Read;
            let mut decoder = flate2::read::ZlibDecoder::new(s(&args[0]).as_bytes());
            let mut out = String::new();
            decoder.read_to_string(&mut out).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(out))
        }

        // ---- crypto ----
        "md5" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(format!("{:x}", md5::Md5::digest(s(&args[0]).as_bytes()))))
        }
        "sha1" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(format!("{:x}", sha1::Sha1::digest(s(&args[0]).as_bytes()))))
        }
        "sha256" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(format!("{:x}", sha2::Sha256::digest(s(&args[0]).as_bytes()))))
        }
        "sha512" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(format!("{:x}", sha2::Sha512::digest(s(&args[0]).as_bytes()))))
        }
        "mmh3" => {
            arity(name, args, 1, 1)?;
            let h = murmurhash32::murmurhash3(s(&args[0]).as_bytes()) as i32;
            Ok(Value::String(h.to_string()))
        }
        "hmac" => {
            arity(name, args, 3, 3)?;
            let algo = s(&args[0]).to_lowercase();
            let data = s(&args[1]);
            let key = s(&args[2]);
            let mac_hex = match algo.as_str() {
                "sha1" => hmac_sha1_hex(&key, &data),
                "sha256" => hmac_sha256_hex(&key, &data),
                "sha512" => hmac_sha512_hex(&key, &data),
                other => return Err(err(format!("hmac: unsupported algorithm {other:?}"))),
            };
            Ok(Value::String(mac_hex))
        }
        "aes_cbc" => {
            arity(name, args, 3, 3)?;
            Ok(Value::String(aes_cbc_encrypt(&s(&args[0]), &s(&args[1]), &s(&args[2]))?))
        }
        "aes_gcm" => {
            arity(name, args, 2, 2)?;
            Ok(Value::String(aes_gcm_encrypt(&s(&args[0]), &s(&args[1]))?))
        }
        "generate_jwt" => {
            arity(name, args, 2, 4)?;
            let claims_json = s(&args[0]);
            let alg = s(&args[1]);
            let secret = args.get(2).map(s).unwrap_or_default();
            let max_age = args.get(3).and_then(|v| v.as_f64());
            Ok(Value::String(generate_jwt(&claims_json, &alg, &secret, max_age)?))
        }

        // ---- numbers / time ----
        "to_number" => {
            arity(name, args, 1, 1)?;
            Ok(Value::Number(n(&args[0], name)?))
        }
        "to_string" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(s(&args[0])))
        }
        "dec_to_hex" => {
            arity(name, args, 1, 1)?;
            Ok(Value::String(format!("{:x}", n(&args[0], name)? as i64)))
        }
        "hex_to_dec" => {
            arity(name, args, 1, 1)?;
            let v = i64::from_str_radix(s(&args[0]).trim_start_matches("0x"), 16)
                .map_err(|e| err(e.to_string()))?;
            Ok(Value::Number(v as f64))
        }
        "oct_to_dec" => {
            arity(name, args, 1, 1)?;
            let v = i64::from_str_radix(&s(&args[0]), 8).map_err(|e| err(e.to_string()))?;
            Ok(Value::Number(v as f64))
        }
        "bin_to_dec" => {
            arity(name, args, 1, 1)?;
            let v = i64::from_str_radix(&s(&args[0]), 2).map_err(|e| err(e.to_string()))?;
            Ok(Value::Number(v as f64))
        }
        "rand_char" => {
            arity(name, args, 0, 1)?;
            let charset = args.first().map(s).unwrap_or_else(alphanumeric_charset);
            Ok(Value::String(rand_from_charset(&charset, 1)))
        }
        "rand_base" => {
            arity(name, args, 1, 3)?;
            let len = n(&args[0], name)? as usize;
            let charset = args.get(1).map(s).unwrap_or_else(alphanumeric_charset);
            Ok(Value::String(rand_from_charset(&charset, len)))
        }
        "rand_text_alphanumeric" => {
            arity(name, args, 1, 2)?;
            let len = n(&args[0], name)? as usize;
            Ok(Value::String(rand_from_charset(&alphanumeric_charset(), len)))
        }
        "rand_text_alpha" => {
            arity(name, args, 1, 2)?;
            let len = n(&args[0], name)? as usize;
            Ok(Value::String(rand_from_charset(
                "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ",
                len,
            )))
        }
        "rand_text_numeric" => {
            arity(name, args, 1, 2)?;
            let len = n(&args[0], name)? as usize;
            Ok(Value::String(rand_from_charset("0123456789", len)))
        }
        "rand_int" => {
            arity(name, args, 0, 2)?;
            let min = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0) as i64;
            let max = args.get(1).and_then(|v| v.as_f64()).unwrap_or(i32::MAX as f64) as i64;
            let v = rand::rng().random_range(min..=max.max(min));
            Ok(Value::Number(v as f64))
        }
        "rand_ip" => {
            arity(name, args, 1, usize::MAX)?;
            let cidr = s(&args[0]);
            Ok(Value::String(rand_ip_in_cidr(&cidr)?))
        }
        "unix_time" => {
            arity(name, args, 0, 1)?;
            let offset = args.first().and_then(|v| v.as_f64()).unwrap_or(0.0) as i64;
            let now = chrono::Utc::now().timestamp();
            Ok(Value::Number((now + offset) as f64))
        }
        "to_unix_time" => {
            arity(name, args, 1, 2)?;
            let text = s(&args[0]);
            let layout = args.get(1).map(s);
            Ok(Value::Number(to_unix_time(&text, layout.as_deref())? as f64))
        }
        "date_time" => {
            arity(name, args, 1, 2)?;
            let fmt = s(&args[0]);
            let unix = args.get(1).and_then(|v| v.as_f64());
            Ok(Value::String(format_date_time(&fmt, unix)))
        }
        "wait_for" => {
            arity(name, args, 1, 1)?;
            let secs = n(&args[0], name)?;
            let dur = std::time::Duration::from_secs_f64(secs.max(0.0));
            // `call` is invoked synchronously from matcher/extractor evaluation
            // running inside tokio tasks (worker_pool's buffer_unordered pool) —
            // a bare std::thread::sleep would stall the whole worker thread.
            // block_in_place hands this thread's other tasks off before blocking.
            tokio::task::block_in_place(|| std::thread::sleep(dur));
            Ok(Value::Bool(true))
        }
        "compare_versions" => {
            arity(name, args, 2, usize::MAX)?;
            Ok(Value::Bool(compare_versions(&s(&args[0]), &args[1..].iter().map(s).collect::<Vec<_>>())))
        }

        // ---- misc ----
        "regex" => {
            arity(name, args, 2, 2)?;
            let re = regex::Regex::new(&s(&args[0])).map_err(|e| err(e.to_string()))?;
            Ok(Value::Bool(re.is_match(&s(&args[1]))))
        }
        "json_minify" => {
            arity(name, args, 1, 1)?;
            let v: serde_json::Value = serde_json::from_str(&s(&args[0])).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(serde_json::to_string(&v).map_err(|e| err(e.to_string()))?))
        }
        "json_prettify" => {
            arity(name, args, 1, 1)?;
            let v: serde_json::Value = serde_json::from_str(&s(&args[0])).map_err(|e| err(e.to_string()))?;
            Ok(Value::String(
                serde_json::to_string_pretty(&v).map_err(|e| err(e.to_string()))?,
            ))
        }
        "resolve" => {
            arity(name, args, 1, 2)?;
            let host = s(&args[0]);
            let record_type = args.get(1).map(s).unwrap_or_else(|| "a".to_string());
            Ok(Value::String(super::resolver::resolve_blocking(&host, &record_type)?))
        }
        "ip_format" => {
            arity(name, args, 2, 2)?;
            Ok(Value::String(ip_format(&s(&args[0]), n(&args[1], name)? as u8)?))
        }
        "generate_java_gadget" => {
            arity(name, args, 2, 3)?;
            let gadget_type = s(&args[0]);
            let cmd = s(&args[1]);
            let encoding = args.get(2).map(s).unwrap_or_else(|| "base64".to_string());
            let descriptor = format!("{gadget_type}:{cmd}");
            Ok(Value::String(match encoding.as_str() {
                "hex" => hex::encode(descriptor),
                _ => base64::engine::general_purpose::STANDARD.encode(descriptor),
            }))
        }
        "print_debug" => {
            arity(name, args, 0, usize::MAX)?;
            tracing::debug!(
                "print_debug: {}",
                args.iter().map(s).collect::<Vec<_>>().join(" ")
            );
            Ok(Value::Bool(true))
        }

        other => Err(err(format!("unknown DSL function {other:?}"))),
    }
}

/// The full list of known function names — used by [`super::substitution`]
/// to decide whether a `{{ ... }}` span is a real expression (spec §4.3).
pub const FUNCTION_NAMES: &[&str] = &[
    "len", "to_upper", "to_lower", "sort", "uniq", "repeat", "replace", "replace_regex", "trim",
    "trim_left", "trim_right", "trim_space", "trim_prefix", "trim_suffix", "reverse", "concat",
    "split", "join", "substr", "starts_with", "ends_with", "line_starts_with", "line_ends_with",
    "contains", "contains_all", "contains_any", "remove_bad_chars", "base64", "base64_decode",
    "base64_py", "url_encode", "url_decode", "hex_encode", "hex_decode", "html_escape",
    "html_unescape", "gzip", "gzip_decode", "zlib", "zlib_decode", "md5", "sha1", "sha256",
    "sha512", "mmh3", "hmac", "aes_cbc", "aes_gcm", "generate_jwt", "to_number", "to_string",
    "dec_to_hex", "hex_to_dec", "oct_to_dec", "bin_to_dec", "rand_char", "rand_base",
    "rand_text_alphanumeric", "rand_text_alpha", "rand_text_numeric", "rand_int", "rand_ip",
    "unix_time", "to_unix_time", "date_time", "wait_for", "compare_versions", "regex",
    "json_minify", "json_prettify", "resolve", "ip_format", "generate_java_gadget", "print_debug",
];

fn hmac_sha1_hex(key: &str, data: &str) -> String {
    let mut mac = hmac::Hmac::<sha1::Sha1>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha256_hex(key: &str, data: &str) -> String {
    let mut mac = hmac::Hmac::<sha2::Sha256>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

fn hmac_sha512_hex(key: &str, data: &str) -> String {
    let mut mac = hmac::Hmac::<sha2::Sha512>::new_from_slice(key.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;

fn aes_cbc_encrypt(plain: &str, key: &str, iv: &str) -> Result<String, DslError> {
    let key = pad_to(key.as_bytes(), 16);
    let iv = pad_to(iv.as_bytes(), 16);
    let enc = Aes128CbcEnc::new(key.as_slice().into(), iv.as_slice().into());
    let ciphertext = enc.encrypt_padded_vec_mut::<aes::cipher::block_padding::Pkcs7>(plain.as_bytes());
    Ok(base64::engine::general_purpose::STANDARD.encode(ciphertext))
}

fn aes_gcm_encrypt(key: &str, plain: &str) -> Result<String, DslError> {
    use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
    use aes_gcm::Aes256Gcm;
    let key_bytes = pad_to(key.as_bytes(), 32);
    let cipher = Aes256Gcm::new(key_bytes.as_slice().into());
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plain.as_bytes())
        .map_err(|e| err(e.to_string()))?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&ciphertext);
    Ok(base64::engine::general_purpose::STANDARD.encode(out))
}

fn pad_to(bytes: &[u8], len: usize) -> Vec<u8> {
    let mut v = bytes.to_vec();
    v.resize(len, 0);
    v.truncate(len);
    v
}

fn generate_jwt(claims_json: &str, alg: &str, secret: &str, max_age: Option<f64>) -> Result<String, DslError> {
    let mut claims: serde_json::Value =
        serde_json::from_str(claims_json).map_err(|e| err(e.to_string()))?;
    if let Some(exp) = max_age {
        if let Some(obj) = claims.as_object_mut() {
            obj.insert("exp".to_string(), serde_json::json!(exp as i64));
        }
    }
    let header_alg = match alg.to_uppercase().as_str() {
        "HS256" | "" => jsonwebtoken::Algorithm::HS256,
        "HS384" => jsonwebtoken::Algorithm::HS384,
        "HS512" => jsonwebtoken::Algorithm::HS512,
        "NONE" => {
            // jsonwebtoken has no "none" algorithm; emit an unsigned-looking
            // token by signing with an empty-key HS256 and truncating the sig.
            let header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::HS256);
            let key = jsonwebtoken::EncodingKey::from_secret(b"");
            let token = jsonwebtoken::encode(&header, &claims, &key).map_err(|e| err(e.to_string()))?;
            let mut parts: Vec<&str> = token.split('.').collect();
            parts.truncate(2);
            return Ok(format!("{}.", parts.join(".")));
        }
        other => return Err(err(format!("generate_jwt: unsupported algorithm {other:?}"))),
    };
    let header = jsonwebtoken::Header::new(header_alg);
    let key = jsonwebtoken::EncodingKey::from_secret(secret.as_bytes());
    jsonwebtoken::encode(&header, &claims, &key).map_err(|e| err(e.to_string()))
}

fn alphanumeric_charset() -> String {
    "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string()
}

fn rand_from_charset(charset: &str, len: usize) -> String {
    let chars: Vec<char> = charset.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let mut rng = rand::rng();
    (0..len).map(|_| chars[rng.random_range(0..chars.len())]).collect()
}

fn rand_ip_in_cidr(cidr: &str) -> Result<String, DslError> {
    let (base, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| err(format!("rand_ip: expected CIDR, got {cidr:?}")))?;
    let prefix: u32 = prefix.parse().map_err(|_| err("rand_ip: bad prefix"))?;
    let base: std::net::Ipv4Addr = base.parse().map_err(|_| err("rand_ip: bad base address"))?;
    let base_bits = u32::from(base);
    let host_bits = 32 - prefix.min(32);
    let mask = if host_bits == 32 { u32::MAX } else { (1u32 << host_bits) - 1 };
    let random_host = rand::rng().random::<u32>() & mask;
    let ip = (base_bits & !mask) | random_host;
    Ok(std::net::Ipv4Addr::from(ip).to_string())
}

fn to_unix_time(text: &str, layout: Option<&str>) -> Result<i64, DslError> {
    if let Ok(n) = text.parse::<i64>() {
        return Ok(n);
    }
    let fmt = layout.unwrap_or("%Y-%m-%dT%H:%M:%S%z");
    chrono::DateTime::parse_from_str(text, fmt)
        .map(|d| d.timestamp())
        .map_err(|e| err(format!("to_unix_time: {e}")))
}

fn format_date_time(fmt: &str, unix: Option<f64>) -> String {
    let dt = match unix {
        Some(ts) => chrono::DateTime::from_timestamp(ts as i64, 0).unwrap_or_else(chrono::Utc::now),
        None => chrono::Utc::now(),
    };
    // `%Y %M %D %H %m %S` zero-padded custom tokens (spec §4.3), distinct
    // from strftime: %M is month (not minute), %D is day, %m is minute.
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('Y') => out.push_str(&format!("{:04}", dt.format("%Y").to_string().parse::<i32>().unwrap_or(0))),
                Some('M') => out.push_str(&format!("{:02}", dt.format("%m").to_string().parse::<u32>().unwrap_or(0))),
                Some('D') => out.push_str(&format!("{:02}", dt.format("%d").to_string().parse::<u32>().unwrap_or(0))),
                Some('H') => out.push_str(&format!("{:02}", dt.format("%H").to_string().parse::<u32>().unwrap_or(0))),
                Some('m') => out.push_str(&format!("{:02}", dt.format("%M").to_string().parse::<u32>().unwrap_or(0))),
                Some('S') => out.push_str(&format!("{:02}", dt.format("%S").to_string().parse::<u32>().unwrap_or(0))),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn compare_versions(version: &str, constraints: &[String]) -> bool {
    let parse = |v: &str| -> Vec<u64> {
        v.trim_start_matches(['<', '>', '='])
            .split('.')
            .map(|p| p.parse().unwrap_or(0))
            .collect()
    };
    let v = parse(version);
    constraints.iter().all(|c| {
        let c = c.trim();
        let (op, rest) = if let Some(r) = c.strip_prefix(">=") {
            (">=", r)
        } else if let Some(r) = c.strip_prefix("<=") {
            ("<=", r)
        } else if let Some(r) = c.strip_prefix('>') {
            (">", r)
        } else if let Some(r) = c.strip_prefix('<') {
            ("<", r)
        } else {
            ("=", c.trim_start_matches('='))
        };
        let target = parse(rest);
        match op {
            ">=" => v >= target,
            "<=" => v <= target,
            ">" => v > target,
            "<" => v < target,
            _ => v == target,
        }
    })
}

fn ip_format(ip: &str, style: u8) -> Result<String, DslError> {
    let addr: std::net::Ipv4Addr = ip.parse().map_err(|_| err(format!("ip_format: bad ip {ip:?}")))?;
    let octets = addr.octets();
    Ok(match style {
        1 => addr.to_string(),
        2 => octets.iter().map(|o| o.to_string()).collect::<Vec<_>>().join("."),
        3 => octets.iter().map(|o| format!("{o:03}")).collect::<Vec<_>>().join("."),
        4 => octets.iter().map(|o| format!("{o:02x}")).collect::<Vec<_>>().join("."),
        5 => octets.iter().map(|o| format!("{o:02x}")).collect::<Vec<_>>().join(""),
        6 => u32::from(addr).to_string(),
        7 => octets.iter().map(|o| format!("{o:o}")).collect::<Vec<_>>().join("."),
        8 => octets.iter().map(|o| format!("{o:08b}")).collect::<Vec<_>>().join("."),
        other => return Err(err(format!("ip_format: unsupported style {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Value {
        Value::String(s.to_string())
    }

    #[test]
    fn encoding_round_trips() {
        let x = v("hello world");
        let enc = call("base64", &[x.clone()]).unwrap();
        let dec = call("base64_decode", &[enc]).unwrap();
        assert_eq!(dec.as_str_lossy(), "hello world");

        let enc = call("hex_encode", &[x.clone()]).unwrap();
        let dec = call("hex_decode", &[enc]).unwrap();
        assert_eq!(dec.as_str_lossy(), "hello world");

        let enc = call("url_encode", &[x.clone()]).unwrap();
        let dec = call("url_decode", &[enc]).unwrap();
        assert_eq!(dec.as_str_lossy(), "hello world");

        let enc = call("gzip", &[x.clone()]).unwrap();
        let dec = call("gzip_decode", &[enc]).unwrap();
        assert_eq!(dec.as_str_lossy(), "hello world");

        let enc = call("zlib", &[x]).unwrap();
        let dec = call("zlib_decode", &[enc]).unwrap();
        assert_eq!(dec.as_str_lossy(), "hello world");
    }

    #[test]
    fn contains_family() {
        let body = v("Powered by WP and nginx");
        assert!(call("contains", &[body.clone(), v("Powered by WP")]).unwrap().as_bool());
        assert!(call("contains_all", &[body.clone(), v("WP"), v("nginx")]).unwrap().as_bool());
        assert!(!call("contains_all", &[body.clone(), v("WP"), v("apache")]).unwrap().as_bool());
        assert!(call("contains_any", &[body, v("zzz"), v("nginx")]).unwrap().as_bool());
    }

    #[test]
    fn substr_handles_negative_end() {
        let out = call("substr", &[v("abcdef"), Value::Number(1.0), Value::Number(-1.0)]).unwrap();
        assert_eq!(out.as_str_lossy(), "bcde");
    }

    #[test]
    fn arity_is_enforced() {
        assert!(call("len", &[]).is_err());
        assert!(call("len", &[v("a"), v("b")]).is_err());
    }

    #[test]
    fn hashing_functions_produce_expected_lengths() {
        assert_eq!(call("md5", &[v("x")]).unwrap().as_str_lossy().len(), 32);
        assert_eq!(call("sha1", &[v("x")]).unwrap().as_str_lossy().len(), 40);
        assert_eq!(call("sha256", &[v("x")]).unwrap().as_str_lossy().len(), 64);
    }

    #[test]
    fn compare_versions_respects_operators() {
        assert!(compare_versions("1.19.0", &[">=1.10.0".to_string(), "<2.0.0".to_string()]));
        assert!(!compare_versions("1.9.0", &[">=1.10.0".to_string()]));
    }

    #[test]
    fn ip_format_dotted_hex_matches_octets() {
        assert_eq!(ip_format("192.168.1.1", 4).unwrap(), "c0.a8.01.01");
    }
}
