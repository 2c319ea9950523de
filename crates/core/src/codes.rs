//! Immediate return codes documented for the gateway's operations.

/// Human-readable meaning of a gateway return code.
pub fn describe_return_code(code: i32) -> &'static str {
    match code {
        0 => "ok",
        1 => "accepted",
        -10 => "failed",
        -11 => "no such condition number",
        -12 => "condition number and name mismatch",
        -13 => "condition search request limit exceeded",
        -100 => "user information exchange failed",
        -101 => "server connection failed",
        -102 => "version update failed",
        -103 => "personal firewall failure",
        -104 => "memory protection failure",
        -105 => "invalid function arguments",
        -106 => "connection closed",
        -107 => "security module error",
        -108 => "certificate login required",
        -200 => "request quota exceeded",
        -201 => "request structure initialisation failed",
        -202 => "request input value error",
        -203 => "no data",
        -204 => "too many codes requested",
        -205 => "data receive failed",
        -206 => "too many fids requested",
        -207 => "real-time release failed",
        -209 => "quote request restricted",
        -300 => "invalid order input",
        -301 => "account password missing",
        -302 => "account belongs to another user",
        -303 => "order price exceeds error threshold",
        -304 => "order price exceeds error threshold",
        -305 => "order quantity exceeds 1% of listed shares",
        -306 => "order quantity exceeds 3% of listed shares",
        -307 => "order send failed",
        -308 => "order send overload",
        -309 => "order quantity exceeds 300 contracts",
        -310 => "order quantity exceeds 500 contracts",
        -340 => "account information missing",
        -500 => "unknown stock code",
        _ => "unknown return code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_codes() {
        assert_eq!(describe_return_code(-200), "request quota exceeded");
        assert_eq!(describe_return_code(-9999), "unknown return code");
    }
}
