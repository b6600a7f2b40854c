//! Bidding zones covered by the dashboard
//!
//! The set is closed: ingestion rejects any area that does not map onto one
//! of these identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the 47 European day-ahead bidding zones
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BiddingZone {
    Al,
    At,
    Ba,
    Be,
    Bg,
    Ch,
    Cz,
    DeLu,
    Dk1,
    Dk2,
    Ee,
    Es,
    Fi,
    Fr,
    Gb,
    Gr,
    Hr,
    Hu,
    IeSem,
    ItCala,
    ItCnor,
    ItCsud,
    ItNord,
    ItSard,
    ItSici,
    ItSud,
    Lt,
    Lv,
    Me,
    Mk,
    Nl,
    No1,
    No2,
    No3,
    No4,
    No5,
    Pl,
    Pt,
    Ro,
    Rs,
    Se1,
    Se2,
    Se3,
    Se4,
    Si,
    Sk,
    UaIps,
}

impl BiddingZone {
    /// Every zone, in identifier order
    pub const ALL: [BiddingZone; 47] = [
        BiddingZone::Al,
        BiddingZone::At,
        BiddingZone::Ba,
        BiddingZone::Be,
        BiddingZone::Bg,
        BiddingZone::Ch,
        BiddingZone::Cz,
        BiddingZone::DeLu,
        BiddingZone::Dk1,
        BiddingZone::Dk2,
        BiddingZone::Ee,
        BiddingZone::Es,
        BiddingZone::Fi,
        BiddingZone::Fr,
        BiddingZone::Gb,
        BiddingZone::Gr,
        BiddingZone::Hr,
        BiddingZone::Hu,
        BiddingZone::IeSem,
        BiddingZone::ItCala,
        BiddingZone::ItCnor,
        BiddingZone::ItCsud,
        BiddingZone::ItNord,
        BiddingZone::ItSard,
        BiddingZone::ItSici,
        BiddingZone::ItSud,
        BiddingZone::Lt,
        BiddingZone::Lv,
        BiddingZone::Me,
        BiddingZone::Mk,
        BiddingZone::Nl,
        BiddingZone::No1,
        BiddingZone::No2,
        BiddingZone::No3,
        BiddingZone::No4,
        BiddingZone::No5,
        BiddingZone::Pl,
        BiddingZone::Pt,
        BiddingZone::Ro,
        BiddingZone::Rs,
        BiddingZone::Se1,
        BiddingZone::Se2,
        BiddingZone::Se3,
        BiddingZone::Se4,
        BiddingZone::Si,
        BiddingZone::Sk,
        BiddingZone::UaIps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BiddingZone::Al => "AL",
            BiddingZone::At => "AT",
            BiddingZone::Ba => "BA",
            BiddingZone::Be => "BE",
            BiddingZone::Bg => "BG",
            BiddingZone::Ch => "CH",
            BiddingZone::Cz => "CZ",
            BiddingZone::DeLu => "DE-LU",
            BiddingZone::Dk1 => "DK1",
            BiddingZone::Dk2 => "DK2",
            BiddingZone::Ee => "EE",
            BiddingZone::Es => "ES",
            BiddingZone::Fi => "FI",
            BiddingZone::Fr => "FR",
            BiddingZone::Gb => "GB",
            BiddingZone::Gr => "GR",
            BiddingZone::Hr => "HR",
            BiddingZone::Hu => "HU",
            BiddingZone::IeSem => "IE-SEM",
            BiddingZone::ItCala => "IT-CALA",
            BiddingZone::ItCnor => "IT-CNOR",
            BiddingZone::ItCsud => "IT-CSUD",
            BiddingZone::ItNord => "IT-NORD",
            BiddingZone::ItSard => "IT-SARD",
            BiddingZone::ItSici => "IT-SICI",
            BiddingZone::ItSud => "IT-SUD",
            BiddingZone::Lt => "LT",
            BiddingZone::Lv => "LV",
            BiddingZone::Me => "ME",
            BiddingZone::Mk => "MK",
            BiddingZone::Nl => "NL",
            BiddingZone::No1 => "NO1",
            BiddingZone::No2 => "NO2",
            BiddingZone::No3 => "NO3",
            BiddingZone::No4 => "NO4",
            BiddingZone::No5 => "NO5",
            BiddingZone::Pl => "PL",
            BiddingZone::Pt => "PT",
            BiddingZone::Ro => "RO",
            BiddingZone::Rs => "RS",
            BiddingZone::Se1 => "SE1",
            BiddingZone::Se2 => "SE2",
            BiddingZone::Se3 => "SE3",
            BiddingZone::Se4 => "SE4",
            BiddingZone::Si => "SI",
            BiddingZone::Sk => "SK",
            BiddingZone::UaIps => "UA-IPS",
        }
    }

    /// Energy Identification Code of the bidding zone, used as the ENTSO-E
    /// `in_Domain` / `out_Domain` and in the `AreaCode` CSV column
    pub fn eic_code(&self) -> &'static str {
        match self {
            BiddingZone::Al => "10YAL-KESH-----5",
            BiddingZone::At => "10YAT-APG------L",
            BiddingZone::Ba => "10YBA-JPCC-----D",
            BiddingZone::Be => "10YBE----------2",
            BiddingZone::Bg => "10YCA-BULGARIA-R",
            BiddingZone::Ch => "10YCH-SWISSGRIDZ",
            BiddingZone::Cz => "10YCZ-CEPS-----N",
            BiddingZone::DeLu => "10Y1001A1001A82H",
            BiddingZone::Dk1 => "10YDK-1--------W",
            BiddingZone::Dk2 => "10YDK-2--------M",
            BiddingZone::Ee => "10Y1001A1001A39I",
            BiddingZone::Es => "10YES-REE------0",
            BiddingZone::Fi => "10YFI-1--------U",
            BiddingZone::Fr => "10YFR-RTE------C",
            BiddingZone::Gb => "10YGB----------A",
            BiddingZone::Gr => "10YGR-HTSO-----Y",
            BiddingZone::Hr => "10YHR-HEP------M",
            BiddingZone::Hu => "10YHU-MAVIR----U",
            BiddingZone::IeSem => "10Y1001A1001A59C",
            BiddingZone::ItCala => "10Y1001C--00096J",
            BiddingZone::ItCnor => "10Y1001A1001A70O",
            BiddingZone::ItCsud => "10Y1001A1001A71M",
            BiddingZone::ItNord => "10Y1001A1001A73I",
            BiddingZone::ItSard => "10Y1001A1001A74G",
            BiddingZone::ItSici => "10Y1001A1001A75E",
            BiddingZone::ItSud => "10Y1001A1001A788",
            BiddingZone::Lt => "10YLT-1001A0008Q",
            BiddingZone::Lv => "10YLV-1001A00074",
            BiddingZone::Me => "10YCS-CG-TSO---S",
            BiddingZone::Mk => "10YMK-MEPSO----8",
            BiddingZone::Nl => "10YNL----------L",
            BiddingZone::No1 => "10YNO-1--------2",
            BiddingZone::No2 => "10YNO-2--------T",
            BiddingZone::No3 => "10YNO-3--------J",
            BiddingZone::No4 => "10YNO-4--------9",
            BiddingZone::No5 => "10Y1001A1001A48H",
            BiddingZone::Pl => "10YPL-AREA-----S",
            BiddingZone::Pt => "10YPT-REN------W",
            BiddingZone::Ro => "10YRO-TEL------P",
            BiddingZone::Rs => "10YCS-SERBIATSOV",
            BiddingZone::Se1 => "10Y1001A1001A44P",
            BiddingZone::Se2 => "10Y1001A1001A45N",
            BiddingZone::Se3 => "10Y1001A1001A46L",
            BiddingZone::Se4 => "10Y1001A1001A47J",
            BiddingZone::Si => "10YSI-ELES-----O",
            BiddingZone::Sk => "10YSK-SEPS-----K",
            BiddingZone::UaIps => "10Y1001C--000182",
        }
    }

    pub fn from_eic(code: &str) -> Option<BiddingZone> {
        let code = code.trim();
        BiddingZone::ALL.iter().copied().find(|zone| zone.eic_code() == code)
    }
}

impl fmt::Display for BiddingZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownZone(pub String);

impl fmt::Display for UnknownZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown bidding zone '{}'", self.0)
    }
}

impl std::error::Error for UnknownZone {}

impl FromStr for BiddingZone {
    type Err = UnknownZone;

    /// Accepts `DE-LU`, `de-lu`, the ENTSO-E display form `BZN|DE-LU` and
    /// the EIC code `10Y1001A1001A82H`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let code = trimmed.strip_prefix("BZN|").unwrap_or(trimmed);

        BiddingZone::ALL
            .iter()
            .copied()
            .find(|zone| zone.as_str().eq_ignore_ascii_case(code))
            .or_else(|| BiddingZone::from_eic(code))
            .ok_or_else(|| UnknownZone(s.to_string()))
    }
}

impl TryFrom<String> for BiddingZone {
    type Error = UnknownZone;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BiddingZone> for String {
    fn from(zone: BiddingZone) -> Self {
        zone.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_zones_are_sorted_and_unique() {
        assert_eq!(BiddingZone::ALL.len(), 47);
        let codes: Vec<&str> = BiddingZone::ALL.iter().map(|z| z.as_str()).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(codes, sorted);
    }

    #[test]
    fn test_enum_order_matches_code_order() {
        let mut zones = BiddingZone::ALL.to_vec();
        zones.reverse();
        zones.sort();
        assert_eq!(zones, BiddingZone::ALL.to_vec());
    }

    #[test]
    fn test_parse_accepts_display_forms() {
        assert_eq!("DE-LU".parse::<BiddingZone>(), Ok(BiddingZone::DeLu));
        assert_eq!("de-lu".parse::<BiddingZone>(), Ok(BiddingZone::DeLu));
        assert_eq!("BZN|NO1".parse::<BiddingZone>(), Ok(BiddingZone::No1));
        assert_eq!(" SE4 ".parse::<BiddingZone>(), Ok(BiddingZone::Se4));
    }

    #[test]
    fn test_eic_codes_are_unique_and_parse_back() {
        let mut codes: Vec<&str> = BiddingZone::ALL.iter().map(|z| z.eic_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), 47);

        for zone in BiddingZone::ALL {
            assert_eq!(zone.eic_code().len(), 16, "{}", zone);
            assert_eq!(zone.eic_code().parse::<BiddingZone>(), Ok(zone));
        }
        assert_eq!(BiddingZone::DeLu.eic_code(), "10Y1001A1001A82H");
        assert_eq!(BiddingZone::from_eic("10YXX-UNKNOWN--0"), None);
    }

    #[test]
    fn test_parse_rejects_unknown_zone() {
        let err = "Atlantis".parse::<BiddingZone>().unwrap_err();
        assert!(err.to_string().contains("Atlantis"));
    }

    #[test]
    fn test_serde_uses_code() {
        let json = serde_json::to_string(&BiddingZone::IeSem).unwrap();
        assert_eq!(json, "\"IE-SEM\"");
        let back: BiddingZone = serde_json::from_str(&json).unwrap();
        assert_eq!(back, BiddingZone::IeSem);
    }
}
