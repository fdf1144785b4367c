//! Object keys and payloads for the generated requests.

const FILLER: &str = "abcdefghijklmnopqrstuvwxyz";

/// Key for request `n`, cycling over `keys` distinct objects.
pub fn object_key(n: u64, keys: u64) -> String {
    format!("benchmark/client{:05}", n % keys.max(1))
}

/// Formats request payloads from a template, optionally padded to a fixed length.
#[derive(Clone, Debug)]
pub struct PayloadGenerator {
    template: String,
    length: Option<usize>,
    filler: String,
}

impl PayloadGenerator {
    pub fn new(template: impl Into<String>, length: Option<usize>) -> Self {
        let filler = FILLER.chars().cycle().take(length.unwrap_or(0)).collect();
        Self {
            template: template.into(),
            length,
            filler,
        }
    }

    /// Payload of request `n`.
    ///
    /// With a configured length, a shorter payload gets a space and the filler from that offset
    /// on, so it is exactly that many bytes long. Longer payloads are left alone.
    pub fn payload(&self, n: u64) -> String {
        let mut payload = self.template.replacen("{}", &format!("{n:05}"), 1);
        if let Some(length) = self.length {
            if payload.len() < length {
                payload.push(' ');
                payload.push_str(&self.filler[payload.len()..]);
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_cycle() {
        assert_eq!(object_key(0, 200), "benchmark/client00000");
        assert_eq!(object_key(7, 200), "benchmark/client00007");
        assert_eq!(object_key(207, 200), "benchmark/client00007");
        assert_eq!(object_key(5, 0), "benchmark/client00000");
    }

    #[test]
    fn formats_request_number() {
        let payloads = PayloadGenerator::new("Hello, S3, {}!", None);
        assert_eq!(payloads.payload(42), "Hello, S3, 00042!");
        assert_eq!(payloads.payload(123_456), "Hello, S3, 123456!");

        let fixed = PayloadGenerator::new("static", None);
        assert_eq!(fixed.payload(1), "static");
    }

    #[test]
    fn pads_to_length() {
        let payloads = PayloadGenerator::new("Hello, S3, {}!", Some(30));
        let payload = payloads.payload(1);
        assert_eq!(payload.len(), 30);
        assert_eq!(payload, "Hello, S3, 00001! stuvwxyzabcd");

        let long = PayloadGenerator::new("Hello, S3, {}!", Some(100));
        let payload = long.payload(1);
        assert_eq!(payload.len(), 100);
        assert!(payload.ends_with("tuv"));
        assert_eq!(&payload[18..22], "stuv");
    }

    #[test]
    fn leaves_longer_payloads_alone() {
        let payloads = PayloadGenerator::new("Hello, S3, {}!", Some(5));
        assert_eq!(payloads.payload(1), "Hello, S3, 00001!");

        let exact = PayloadGenerator::new("Hello, S3, {}!", Some(17));
        assert_eq!(exact.payload(1), "Hello, S3, 00001!");

        let one_short = PayloadGenerator::new("Hello, S3, {}!", Some(18));
        assert_eq!(one_short.payload(1), "Hello, S3, 00001! ");
    }
}
