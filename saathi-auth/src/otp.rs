use chrono::Duration;
use rand::Rng;

pub const OTP_TTL_MINUTES: i64 = 10;

pub fn otp_ttl() -> Duration {
    Duration::minutes(OTP_TTL_MINUTES)
}

/// Six random digits, or the pinned development code when one is configured.
pub fn generate_otp(fixed: Option<&str>) -> String {
    match fixed {
        Some(code) => code.to_string(),
        None => rand::thread_rng().gen_range(100_000..1_000_000).to_string(),
    }
}

/// There is no SMS gateway; the code only goes to the log.
pub fn deliver_otp(mobile_number: &str, otp: &str) {
    log::info!("OTP for {mobile_number}: {otp} (valid {OTP_TTL_MINUTES} minutes)");
}
