//! Lua versions of the storage-backed algorithms
//!
//! Backends with scripting support run each decision as a single script, so
//! limiters in different processes sharing one Redis cannot interleave
//! between reading and writing a key's state. The arithmetic is the same as
//! on the in-process path and timestamps come from the limiter's clock.
//!
//! Every script replies with strings: `"1"`/`"0"` for the decision first,
//! then the state the result is built from.

use crate::error::{LimiterError, Result};
use std::str::FromStr;

/// KEYS: tokens, last_refill. ARGV: now µs, n, capacity, rate, window µs.
/// Reply: allowed, tokens.
pub(crate) const TOKEN_BUCKET: &str = r#"
local now = tonumber(ARGV[1])
local n = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local rate = tonumber(ARGV[4])
local window = tonumber(ARGV[5])

local tokens = tonumber(redis.call('GET', KEYS[1]))
local last_refill = tonumber(redis.call('GET', KEYS[2]))
if tokens == nil or last_refill == nil then
  tokens = capacity
else
  local elapsed = math.max(now - last_refill, 0)
  tokens = math.min(math.max(tokens + elapsed * rate / window, 0), capacity)
end

local allowed = n <= tokens
if allowed and n > 0 then
  tokens = tokens - n
  local ttl = string.format('%d', math.ceil(((capacity - tokens) * window / rate + window) / 1000))
  redis.call('SET', KEYS[1], string.format('%.17g', tokens), 'PX', ttl)
  redis.call('SET', KEYS[2], ARGV[1], 'PX', ttl)
end

return {allowed and '1' or '0', string.format('%.17g', tokens)}
"#;

/// KEYS: level, last_leak. ARGV: now µs, n, capacity, rate, window µs.
/// Reply: allowed, level.
pub(crate) const LEAKY_BUCKET: &str = r#"
local now = tonumber(ARGV[1])
local n = tonumber(ARGV[2])
local capacity = tonumber(ARGV[3])
local rate = tonumber(ARGV[4])
local window = tonumber(ARGV[5])

local level = tonumber(redis.call('GET', KEYS[1]))
local last_leak = tonumber(redis.call('GET', KEYS[2]))
if level == nil or last_leak == nil then
  level = 0
else
  local elapsed = math.max(now - last_leak, 0)
  level = math.max(level - elapsed * rate / window, 0)
end

local allowed = level + n <= capacity
if allowed and n > 0 then
  level = level + n
  local ttl = string.format('%d', math.ceil((level * window / rate + window) / 1000))
  redis.call('SET', KEYS[1], string.format('%.17g', level), 'PX', ttl)
  redis.call('SET', KEYS[2], ARGV[1], 'PX', ttl)
end

return {allowed and '1' or '0', string.format('%.17g', level)}
"#;

/// KEYS: counter. ARGV: n, rate, ms until the window ends.
/// Reply: allowed, count.
pub(crate) const FIXED_WINDOW: &str = r#"
local n = tonumber(ARGV[1])
local rate = tonumber(ARGV[2])

local count = tonumber(redis.call('GET', KEYS[1])) or 0
local allowed = count + n <= rate
if allowed and n > 0 then
  local fresh = count == 0
  count = redis.call('INCRBY', KEYS[1], n)
  if fresh then
    redis.call('PEXPIRE', KEYS[1], ARGV[3])
  end
end

return {allowed and '1' or '0', tostring(count)}
"#;

/// KEYS: log. ARGV: now µs, n, rate, window µs, window ms, then n members.
/// Reply: allowed, then the scores left in the window before this request.
pub(crate) const SLIDING_WINDOW: &str = r#"
local now = tonumber(ARGV[1])
local n = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local window = tonumber(ARGV[4])

redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', string.format('%d', now - window))
local entries = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', '+inf', 'WITHSCORES')

local count = #entries / 2
local allowed = count + n <= rate
local reply = {allowed and '1' or '0'}
for i = 2, #entries, 2 do
  reply[#reply + 1] = entries[i]
end

if allowed and n > 0 then
  for i = 6, #ARGV do
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[i])
  end
  redis.call('PEXPIRE', KEYS[1], ARGV[5])
end

return reply
"#;

/// Borrow owned script arguments as the `&str` slice storage takes
pub(crate) fn as_args(values: &[String]) -> Vec<&str> {
    values.iter().map(String::as_str).collect()
}

/// The decision flag leading every reply
pub(crate) fn reply_allowed(key: &str, reply: &[String]) -> Result<bool> {
    match reply.first().map(String::as_str) {
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        other => Err(malformed(key, format!("decision flag {other:?}"))),
    }
}

/// Field `index` of a reply
pub(crate) fn reply_field<T: FromStr>(key: &str, reply: &[String], index: usize) -> Result<T> {
    let raw = reply
        .get(index)
        .ok_or_else(|| malformed(key, format!("{} fields, wanted field {index}", reply.len())))?;
    raw.parse()
        .map_err(|_| malformed(key, format!("unparseable field {index}: {raw:?}")))
}

fn malformed(key: &str, reason: String) -> LimiterError {
    LimiterError::CorruptState {
        key: key.to_string(),
        reason: format!("malformed script reply, {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(fields: &[&str]) -> Vec<String> {
        fields.iter().map(|f| f.to_string()).collect()
    }

    #[test]
    fn test_reply_parsing() {
        let ok = reply(&["1", "0.29999999999999999"]);
        assert!(reply_allowed("k", &ok).unwrap());
        let tokens: f64 = reply_field("k", &ok, 1).unwrap();
        assert!((tokens - 0.3).abs() < 1e-12);

        let denied = reply(&["0", "7"]);
        assert!(!reply_allowed("k", &denied).unwrap());
        assert_eq!(reply_field::<i64>("k", &denied, 1).unwrap(), 7);
    }

    #[test]
    fn test_malformed_replies() {
        assert!(matches!(
            reply_allowed("k", &[]),
            Err(LimiterError::CorruptState { .. })
        ));
        assert!(reply_allowed("k", &reply(&["yes"])).is_err());
        assert!(reply_field::<f64>("k", &reply(&["1"]), 1).is_err());
        assert!(reply_field::<f64>("k", &reply(&["1", "lots"]), 1).is_err());
    }
}
