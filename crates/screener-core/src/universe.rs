use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Validation gates applied during scanning. Config values override these
/// per-universe defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ValidationGates {
    pub min_market_cap: f64,
    pub min_avg_volume: f64,
    pub min_price: f64,
    pub max_price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sector {
    pub name: String,
    /// Score multiplier in [0.9, 1.4].
    pub weight: f64,
    pub tickers: Vec<String>,
}

/// A named set of tickers partitioned into sectors, plus the index symbols
/// the market monitor needs. Immutable during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Universe {
    pub name: String,
    pub index_symbol: String,
    pub vol_gauge_symbol: Option<String>,
    /// Leading external index whose overnight close drives the gap
    /// prediction. Absent for the US universe.
    pub lead_index_symbol: Option<String>,
    pub gates: ValidationGates,
    pub sectors: Vec<Sector>,
}

fn sector(name: &str, weight: f64, symbols: &[&str], suffix: &str) -> Sector {
    Sector {
        name: name.to_string(),
        weight,
        tickers: symbols.iter().map(|s| format!("{}{}", s, suffix)).collect(),
    }
}

impl Universe {
    /// ASX universe: 8 sectors, `.AX` suffix, AXJO index with the AXVI
    /// volatility gauge; the S&P 500 close leads the overnight gap.
    pub fn builtin_au() -> Self {
        let sectors = vec![
            sector("Financials", 1.30, &[
                "CBA", "WBC", "ANZ", "NAB", "MQG", "BEN", "BOQ", "SUN", "QBE", "IAG",
                "AMP", "ASX", "MPL", "NHF", "CGF", "PPT", "MFG", "GQG", "HUB", "NWL",
                "IFL", "PNI", "JDO", "ZIP",
            ], ".AX"),
            sector("Materials", 1.20, &[
                "BHP", "RIO", "FMG", "S32", "MIN", "IGO", "PLS", "LYC", "NST", "EVN",
                "RRL", "PRU", "GOR", "DEG", "SFR", "ILU", "ALK", "BSL", "SGM", "AWC",
                "CIA", "CHN", "WAF", "CMM",
            ], ".AX"),
            sector("Energy", 1.00, &[
                "WDS", "STO", "ORG", "BPT", "KAR", "PDN", "WHC", "NHC", "YAL", "SOL",
                "VEA", "ALD", "BOE", "DYL", "CUE", "COE",
            ], ".AX"),
            sector("Healthcare", 1.10, &[
                "CSL", "RMD", "COH", "SHL", "FPH", "RHC", "PME", "NAN", "HLS", "EBO",
                "SIG", "ACL", "MSB", "NEU", "TLX", "CUV",
            ], ".AX"),
            sector("Consumer", 0.95, &[
                "WOW", "COL", "WES", "JBH", "HVN", "KGN", "TPW", "BRG", "DMP", "CKF",
                "LOV", "PMV", "SUL", "EDV", "TWE", "A2M", "BGA", "ING", "MTS", "GYG",
            ], ".AX"),
            sector("Industrials", 1.00, &[
                "TCL", "QAN", "BXB", "AZJ", "ALX", "SVW", "DOW", "MND", "NWH", "SSM",
                "VNT", "ALQ", "REH", "RWC", "JHX", "BLD", "SGF", "IPH",
            ], ".AX"),
            sector("Technology", 1.25, &[
                "XRO", "WTC", "ALU", "APX", "MP1", "NXT", "TNE", "CPU", "DTL", "IRE",
                "BVS", "CDA", "EOS", "SDR", "NEA", "PPS",
            ], ".AX"),
            sector("Telecom & Utilities", 0.90, &[
                "TLS", "TPG", "SPK", "CNU", "APA", "AGL", "MEZ", "GNE", "ABB", "SLC",
                "MAQ", "UWL",
            ], ".AX"),
        ];

        let mut universe = Self {
            name: "au".to_string(),
            index_symbol: "^AXJO".to_string(),
            vol_gauge_symbol: Some("^AXVI".to_string()),
            lead_index_symbol: Some("^GSPC".to_string()),
            gates: ValidationGates {
                min_market_cap: 1.0e8,
                min_avg_volume: 5.0e4,
                min_price: 0.10,
                max_price: 500.0,
            },
            sectors,
        };
        universe.normalize();
        universe
    }

    /// US universe: 8 sectors, no suffix, SPX index with the VIX gauge.
    /// No external lead, so the gap prediction is omitted.
    pub fn builtin_us() -> Self {
        let sectors = vec![
            sector("Technology", 1.25, &[
                "AAPL", "MSFT", "GOOGL", "NVDA", "META", "AVGO", "ORCL", "CRM", "AMD",
                "ADBE", "INTC", "CSCO", "QCOM", "TXN", "NOW", "IBM", "AMAT", "MU",
                "SNPS", "PANW", "CRWD", "SNOW", "DDOG", "NET",
            ], ""),
            sector("Healthcare", 1.10, &[
                "JNJ", "UNH", "PFE", "ABBV", "MRK", "LLY", "TMO", "ABT", "DHR", "BMY",
                "AMGN", "GILD", "MDT", "ISRG", "VRTX", "REGN", "ZTS", "CVS", "CI", "HUM",
            ], ""),
            sector("Financials", 1.15, &[
                "JPM", "BAC", "GS", "V", "MA", "WFC", "MS", "AXP", "SCHW", "BLK",
                "C", "CB", "MMC", "ICE", "USB", "PNC", "TFC", "COF", "SPGI", "AON",
            ], ""),
            sector("Energy", 1.00, &[
                "XOM", "CVX", "COP", "SLB", "EOG", "MPC", "PSX", "VLO", "OXY", "HAL",
                "DVN", "FANG", "WMB", "KMI", "OKE", "BKR",
            ], ""),
            sector("Consumer Discretionary", 1.05, &[
                "AMZN", "TSLA", "HD", "NKE", "SBUX", "MCD", "LOW", "TJX", "BKNG", "CMG",
                "ORLY", "ROST", "DHI", "LEN", "GM", "F", "MAR", "HLT", "YUM", "LULU",
            ], ""),
            sector("Industrials", 1.00, &[
                "CAT", "BA", "HON", "UPS", "GE", "RTX", "DE", "LMT", "UNP", "ETN",
                "WM", "EMR", "ITW", "FDX", "NSC", "GD", "NOC", "PH", "CSX", "CMI",
            ], ""),
            sector("Communications", 0.95, &[
                "NFLX", "DIS", "CMCSA", "T", "VZ", "TMUS", "CHTR", "EA", "TTWO", "WBD",
                "OMC", "IPG", "LYV", "MTCH", "PINS", "SNAP",
            ], ""),
            sector("Consumer Staples", 0.90, &[
                "PG", "KO", "PEP", "COST", "WMT", "PM", "MO", "CL", "KHC", "GIS",
                "KMB", "SYY", "STZ", "HSY", "MKC", "CHD",
            ], ""),
        ];

        let mut universe = Self {
            name: "us".to_string(),
            index_symbol: "^GSPC".to_string(),
            vol_gauge_symbol: Some("^VIX".to_string()),
            lead_index_symbol: None,
            gates: ValidationGates {
                min_market_cap: 5.0e8,
                min_avg_volume: 5.0e5,
                min_price: 1.0,
                max_price: 10_000.0,
            },
            sectors,
        };
        universe.normalize();
        universe
    }

    /// Uppercase every symbol and drop duplicates, keeping first occurrence.
    /// Done once at load; tickers are treated opaquely afterwards.
    pub fn normalize(&mut self) {
        let mut seen: HashSet<String> = HashSet::new();
        for sector in &mut self.sectors {
            sector.tickers = sector
                .tickers
                .iter()
                .map(|t| t.trim().to_uppercase())
                .filter(|t| !t.is_empty() && seen.insert(t.clone()))
                .collect();
        }
        self.sectors.retain(|s| !s.tickers.is_empty());
    }

    pub fn all_tickers(&self) -> Vec<String> {
        self.sectors
            .iter()
            .flat_map(|s| s.tickers.iter().cloned())
            .collect()
    }

    pub fn ticker_count(&self) -> usize {
        self.sectors.iter().map(|s| s.tickers.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ticker_count() == 0
    }

    /// Keep only the named sectors (case-insensitive). Unknown names are
    /// ignored; restricting to nothing leaves an empty universe, which the
    /// orchestrator rejects.
    pub fn restrict_sectors(&mut self, names: &[String]) {
        let wanted: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        self.sectors.retain(|s| wanted.contains(&s.name.to_lowercase()));
    }

    /// Test mode: first 5 tickers of the first sector only.
    pub fn truncate_for_test(&mut self) {
        self.sectors.truncate(1);
        if let Some(first) = self.sectors.first_mut() {
            first.tickers.truncate(5);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_universes_are_well_formed() {
        for universe in [Universe::builtin_au(), Universe::builtin_us()] {
            assert_eq!(universe.sectors.len(), 8);
            assert!(universe.ticker_count() > 100, "{}", universe.name);
            for sector in &universe.sectors {
                assert!(
                    (0.9..=1.4).contains(&sector.weight),
                    "{} weight {}",
                    sector.name,
                    sector.weight
                );
            }
        }
    }

    #[test]
    fn au_tickers_carry_suffix() {
        let universe = Universe::builtin_au();
        for ticker in universe.all_tickers() {
            assert!(ticker.ends_with(".AX"), "{}", ticker);
        }
    }

    #[test]
    fn normalize_uppercases_and_dedupes() {
        let mut universe = Universe::builtin_au();
        universe.sectors[0].tickers = vec![
            "cba.ax".to_string(),
            "CBA.AX".to_string(),
            " wbc.ax ".to_string(),
        ];
        universe.normalize();
        assert_eq!(universe.sectors[0].tickers, vec!["CBA.AX", "WBC.AX"]);
    }

    #[test]
    fn no_duplicate_tickers_across_sectors() {
        for universe in [Universe::builtin_au(), Universe::builtin_us()] {
            let all = universe.all_tickers();
            let unique: HashSet<_> = all.iter().collect();
            assert_eq!(all.len(), unique.len(), "{}", universe.name);
        }
    }

    #[test]
    fn test_mode_keeps_five_tickers() {
        let mut universe = Universe::builtin_au();
        universe.truncate_for_test();
        assert_eq!(universe.sectors.len(), 1);
        assert_eq!(universe.ticker_count(), 5);
    }

    #[test]
    fn sector_restriction_is_case_insensitive() {
        let mut universe = Universe::builtin_au();
        universe.restrict_sectors(&["financials".to_string()]);
        assert_eq!(universe.sectors.len(), 1);
        assert_eq!(universe.sectors[0].name, "Financials");
    }
}
