use std::fmt;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Vendor routing region. Every account lives on exactly one.
///
/// Derived from the account's country; the vendor exposes one endpoint
/// family per continent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Continent {
    /// Europe.
    Eu,
    /// North America.
    Na,
    /// Asia.
    As,
    /// Everything else goes through the worldwide endpoint.
    Ww,
}

impl Continent {
    /// Look up the routing continent for an ISO 3166-1 alpha-2 country code.
    pub fn for_country(code: &str) -> Option<Self> {
        let code = code.to_ascii_uppercase();
        let continent = match code.as_str() {
            "AD" | "AL" | "AT" | "BA" | "BE" | "BG" | "BY" | "CH" | "CY" | "CZ" | "DE" | "DK"
            | "EE" | "ES" | "FI" | "FO" | "FR" | "GB" | "GI" | "GR" | "HR" | "HU" | "IE"
            | "IS" | "IT" | "LI" | "LT" | "LU" | "LV" | "MC" | "MD" | "ME" | "MK" | "MT"
            | "NL" | "NO" | "PL" | "PT" | "RO" | "RS" | "SE" | "SI" | "SK" | "SM" | "UA"
            | "UK" | "VA" => Self::Eu,
            "US" | "CA" | "MX" | "PR" | "BS" | "BM" | "GL" => Self::Na,
            "CN" | "HK" | "ID" | "IL" | "IN" | "JP" | "KR" | "MO" | "MY" | "PH" | "SA" | "SG"
            | "TH" | "TR" | "TW" | "AE" | "VN" | "QA" | "KW" | "PK" => Self::As,
            "AR" | "AU" | "BR" | "CL" | "CO" | "EG" | "KE" | "MA" | "NG" | "NZ" | "PE" | "RU"
            | "ZA" | "UY" | "VE" => Self::Ww,
            _ => return None,
        };
        Some(continent)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eu => "EU",
            Self::Na => "NA",
            Self::As => "AS",
            Self::Ww => "WW",
        }
    }
}

impl fmt::Display for Continent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lower-case hex MD5 digest, the form the vendor expects for both the
/// password and the device fingerprint.
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Account credentials for a vendor session.
///
/// Immutable once constructed: the password and machine id are digested
/// up front and only the digests are retained.
#[derive(Clone)]
pub struct Credentials {
    login: String,
    password_digest: SecretString,
    device_fingerprint: String,
    country: String,
    continent: Continent,
}

impl Credentials {
    /// Build credentials from the raw login material.
    ///
    /// Fails with [`Error::UnknownCountry`] when the country code has no
    /// routing continent.
    pub fn new(
        login: impl Into<String>,
        password: &SecretString,
        machine_id: &str,
        country_code: &str,
    ) -> Result<Self, Error> {
        use secrecy::ExposeSecret;

        let country = country_code.trim().to_ascii_uppercase();
        let continent = Continent::for_country(&country)
            .ok_or_else(|| Error::UnknownCountry(country_code.to_owned()))?;

        Ok(Self {
            login: login.into(),
            password_digest: SecretString::from(md5_hex(password.expose_secret())),
            device_fingerprint: md5_hex(machine_id),
            country,
            continent,
        })
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    pub fn password_digest(&self) -> &SecretString {
        &self.password_digest
    }

    pub fn device_fingerprint(&self) -> &str {
        &self.device_fingerprint
    }

    /// Upper-cased ISO country code.
    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn continent(&self) -> Continent {
        self.continent
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password_digest", &"[REDACTED]")
            .field("device_fingerprint", &self.device_fingerprint)
            .field("country", &self.country)
            .field("continent", &self.continent)
            .finish()
    }
}
