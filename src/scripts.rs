//! # Server-Side Atomic Routines
//!
//! The four Lua routines that run inside the store. Each executes as a
//! single atomic unit against its key(s), reads the clock from the
//! store (`TIME`), and returns the mutated state in one round trip:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │  TAKE           KEYS: state        read → refill → deduct → TTL  │
//! │  TAKE_ELEVATED  KEYS: state, flag  as TAKE + promotion machine   │
//! │  PUT            KEYS: state        restore tokens up to size     │
//! │  GET            KEYS: state        read-only projection          │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! State lives in a hash with two fields: `d` (last-drip timestamp,
//! store clock, ms) and `r` (remaining tokens, numeric string — may be
//! fractional mid-refill). Writes happen after `TIME`, so the mutating
//! routines opt into effects replication first.
//!
//! All arguments travel as strings and are `tonumber`ed on arrival;
//! `r` is written back with `tostring` to preserve fractions.

/// Atomic standard take.
///
/// `KEYS[1]` state key. `ARGV`: tokens_per_ms, size, count, ttl_s,
/// drip_interval_ms. Returns `{remaining, conformant, now_ms, reset_ms}`.
pub const TAKE: &str = r#"
redis.replicate_commands()

local tokens_per_ms = tonumber(ARGV[1])
local size = tonumber(ARGV[2])
local count = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local drip_interval = tonumber(ARGV[5])

local state = redis.call('HMGET', KEYS[1], 'd', 'r')
local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local content
if state[1] and tokens_per_ms > 0 then
    local delta_ms = math.max(now_ms - tonumber(state[1]), 0)
    content = math.min(tonumber(state[2]) + delta_ms * tokens_per_ms, size)
elseif state[1] then
    content = tonumber(state[2])
else
    content = size
end

local conformant = content >= count
local remaining = content
if conformant then
    remaining = math.min(content - count, size)
end

redis.call('HSET', KEYS[1], 'd', now_ms, 'r', tostring(remaining))
redis.call('EXPIRE', KEYS[1], ttl)

local reset_ms = 0
if drip_interval > 0 then
    reset_ms = math.ceil(now_ms + (size - remaining) * drip_interval)
end

return { tostring(remaining), conformant and 1 or 0, now_ms, reset_ms }
"#;

/// Atomic elevated take.
///
/// `KEYS[1]` state key, `KEYS[2]` activation key. `ARGV`: tokens_per_ms,
/// size, count, ttl_s, drip_interval_ms, erl_tokens_per_ms, erl_size,
/// erl_ttl_s, erl_drip_interval_ms, erl_activation_period_s. Returns
/// `{remaining, conformant, now_ms, reset_ms, erl_active}`.
///
/// Promotion carries forward the tokens already consumed under the
/// standard capacity (`erl_size - used`), so activation never refunds
/// a charge. Demotion happens only through TTL expiry of `KEYS[2]`.
pub const TAKE_ELEVATED: &str = r#"
redis.replicate_commands()

local tokens_per_ms = tonumber(ARGV[1])
local size = tonumber(ARGV[2])
local count = tonumber(ARGV[3])
local ttl = tonumber(ARGV[4])
local drip_interval = tonumber(ARGV[5])
local erl_tokens_per_ms = tonumber(ARGV[6])
local erl_size = tonumber(ARGV[7])
local erl_ttl = tonumber(ARGV[8])
local erl_drip_interval = tonumber(ARGV[9])
local erl_activation_period = tonumber(ARGV[10])

local erl_on = redis.call('EXISTS', KEYS[2]) == 1

local state = redis.call('HMGET', KEYS[1], 'd', 'r')
local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local rate = tokens_per_ms
local cap = size
if erl_on then
    rate = erl_tokens_per_ms
    cap = erl_size
end

local content
if state[1] and rate > 0 then
    local delta_ms = math.max(now_ms - tonumber(state[1]), 0)
    content = math.min(tonumber(state[2]) + delta_ms * rate, cap)
elseif state[1] then
    content = tonumber(state[2])
else
    content = cap
end

local enough = content >= count

if not enough and not erl_on then
    local used = size - content
    local carried = erl_size - used
    if carried >= count then
        erl_on = true
        redis.call('SET', KEYS[2], '1', 'EX', erl_activation_period)
        enough = true
        content = carried
        cap = erl_size
    end
end

local remaining = content
if enough then
    remaining = math.min(content - count, cap)
end

redis.call('HSET', KEYS[1], 'd', now_ms, 'r', tostring(remaining))
if erl_on then
    redis.call('EXPIRE', KEYS[1], erl_ttl)
else
    redis.call('EXPIRE', KEYS[1], ttl)
end

local reset_ms = 0
local reset_drip = drip_interval
local reset_cap = size
if erl_on then
    reset_drip = erl_drip_interval
    reset_cap = erl_size
end
if reset_drip > 0 then
    reset_ms = math.ceil(now_ms + (reset_cap - remaining) * reset_drip)
end

return { tostring(remaining), enough and 1 or 0, now_ms, reset_ms, erl_on and 1 or 0 }
"#;

/// Atomic put: restore tokens up to capacity. Missing state counts as a
/// full bucket. Negative counts are permitted and may drive `r` below
/// zero.
///
/// `KEYS[1]` state key. `ARGV`: count, size, ttl_s, drip_interval_ms.
/// Returns `{remaining, now_ms, reset_ms}`.
pub const PUT: &str = r#"
redis.replicate_commands()

local count = tonumber(ARGV[1])
local size = tonumber(ARGV[2])
local ttl = tonumber(ARGV[3])
local drip_interval = tonumber(ARGV[4])

local current = redis.call('HGET', KEYS[1], 'r')
local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local remaining = size
if current then
    remaining = tonumber(current)
end
remaining = math.min(remaining + count, size)

redis.call('HSET', KEYS[1], 'd', now_ms, 'r', tostring(remaining))
redis.call('EXPIRE', KEYS[1], ttl)

local reset_ms = 0
if drip_interval > 0 then
    reset_ms = math.ceil(now_ms + (size - remaining) * drip_interval)
end

return { tostring(remaining), now_ms, reset_ms }
"#;

/// Read-only projection: remaining (defaulting to size when absent) and
/// the projected reset time. Never mutates state.
///
/// `KEYS[1]` state key. `ARGV`: size, drip_interval_ms. Returns
/// `{remaining, now_ms, reset_ms}`.
pub const GET: &str = r#"
local size = tonumber(ARGV[1])
local drip_interval = tonumber(ARGV[2])

local current = redis.call('HGET', KEYS[1], 'r')
local time = redis.call('TIME')
local now_ms = tonumber(time[1]) * 1000 + math.floor(tonumber(time[2]) / 1000)

local remaining = size
if current then
    remaining = tonumber(current)
end

local reset_ms = 0
if drip_interval > 0 then
    reset_ms = math.ceil(now_ms + (size - remaining) * drip_interval)
end

return { tostring(remaining), now_ms, reset_ms }
"#;
