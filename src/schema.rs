use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Standard delivery and ledger column names shared by every component.
pub mod columns {
    pub const VENDOR_KEY: &str = "Vendor Key";
    pub const FPN: &str = "FPN";
    pub const PLAN_FPN: &str = "Plan FPN";
    pub const DATE: &str = "Date";
    pub const IMPRESSIONS: &str = "Impressions";
    pub const CLICKS: &str = "Clicks";
    pub const NET_COST: &str = "Net Cost";
    pub const VIDEO_VIEWS: &str = "Video Views";
    pub const VIDEO_VIEWS_100: &str = "Video Views 100";
    pub const LANDING_PAGE: &str = "Landing Page";
    pub const VIEWABLE_IMPRESSIONS: &str = "Viewable Impressions";
    pub const ENGAGEMENTS: &str = "Engagements";
    pub const CONVERSIONS: &str = "Conversions";
    pub const NEW_USERS: &str = "New Users";
    pub const SIGNUPS: &str = "Signups";
    pub const DCM_SERVICE_FEE: &str = "DCM Service Fee";
    pub const UNCAPPED: &str = "Uncapped";

    pub const PLANNED_NET_COST: &str = "Planned Net Cost";
    /// Delivered spend as imported, kept so pricing can be re-run.
    pub const RAW_NET_COST: &str = "Raw Net Cost";
    pub const NET_COST_FINAL: &str = "Net Cost Final";
    pub const AGENCY_FEES: &str = "Agency Fees";
    pub const TOTAL_COST: &str = "Total Cost";
    pub const AD_SERVING_COST: &str = "Ad Serving Cost";
    pub const VERIFICATION_COST: &str = "Verification Cost";
    pub const REPORTING_COST: &str = "Reporting Cost";

    /// Metric columns a vendor matrix row may map from raw headers.
    pub const METRICS: &[&str] = &[
        IMPRESSIONS,
        CLICKS,
        NET_COST,
        VIDEO_VIEWS,
        VIDEO_VIEWS_100,
        LANDING_PAGE,
        VIEWABLE_IMPRESSIONS,
        ENGAGEMENTS,
        CONVERSIONS,
        NEW_USERS,
        SIGNUPS,
        DCM_SERVICE_FEE,
    ];

    /// Ancillary cost columns folded into Total Cost when present.
    pub const ANCILLARY_COSTS: &[&str] = &[
        AD_SERVING_COST,
        VERIFICATION_COST,
        REPORTING_COST,
        DCM_SERVICE_FEE,
    ];
}

/// Dictionary attribute names.
pub mod dictionary_columns {
    pub const FPN: &str = super::columns::FPN;
    pub const CAMPAIGN: &str = "Campaign";
    pub const VENDOR: &str = "Vendor";
    pub const VENDOR_TYPE: &str = "Vendor Type";
    pub const COUNTRY: &str = "Country";
    pub const REGION: &str = "Region";
    pub const AGENCY: &str = "Agency";
    pub const AGENCY_FEES_RATE: &str = "Agency Fees Rate";
    pub const BUY_MODEL: &str = "Buy Model";
    pub const BUY_RATE: &str = "Buy Rate";
    pub const BUY_RATE_2: &str = "Buy Rate 2";
    pub const BUY_RATE_3: &str = "Buy Rate 3";
    pub const BUY_RATE_4: &str = "Buy Rate 4";
    pub const BUY_RATE_5: &str = "Buy Rate 5";
    pub const PLACEMENT_DATE: &str = "Placement Date";
    pub const PLACEMENT_DATE_2: &str = "Placement Date 2";
    pub const PLACEMENT_DATE_3: &str = "Placement Date 3";
    pub const PLACEMENT_DATE_4: &str = "Placement Date 4";
    pub const PLACEMENT_NAME: &str = "Placement Name";
    pub const PLACEMENT_TYPE: &str = "Placement Type";
    pub const CREATIVE: &str = "Creative";
    pub const COPY: &str = "Copy";
    pub const FORMAT: &str = "Format";
    pub const SIZE: &str = "Size";
    pub const TARGETING: &str = "Targeting";
    pub const ENVIRONMENT: &str = "Environment";
    pub const DEVICE: &str = "Device";
    pub const RETAILER: &str = "Retailer";
    pub const SERVING: &str = "Serving";
    pub const VERIFICATION: &str = "Verification";
    pub const REPORTING: &str = "Reporting";
    pub const AD_RATE: &str = "Ad Rate";
    pub const KPI: &str = "KPI";
    pub const MISC: &str = "Misc";

    pub const ALL: &[&str] = &[
        FPN,
        CAMPAIGN,
        VENDOR,
        VENDOR_TYPE,
        COUNTRY,
        REGION,
        AGENCY,
        AGENCY_FEES_RATE,
        BUY_MODEL,
        BUY_RATE,
        BUY_RATE_2,
        BUY_RATE_3,
        BUY_RATE_4,
        BUY_RATE_5,
        PLACEMENT_DATE,
        PLACEMENT_DATE_2,
        PLACEMENT_DATE_3,
        PLACEMENT_DATE_4,
        PLACEMENT_NAME,
        PLACEMENT_TYPE,
        CREATIVE,
        COPY,
        FORMAT,
        SIZE,
        TARGETING,
        ENVIRONMENT,
        DEVICE,
        RETAILER,
        SERVING,
        VERIFICATION,
        REPORTING,
        AD_RATE,
        KPI,
        MISC,
    ];

    pub const FLOAT_COLUMNS: &[&str] = &[
        AGENCY_FEES_RATE,
        BUY_RATE,
        BUY_RATE_2,
        BUY_RATE_3,
        BUY_RATE_4,
        BUY_RATE_5,
        AD_RATE,
    ];

    pub const DATE_COLUMNS: &[&str] = &[
        PLACEMENT_DATE,
        PLACEMENT_DATE_2,
        PLACEMENT_DATE_3,
        PLACEMENT_DATE_4,
    ];

    /// Rates in tier order, paired with the date a tier starts on. Tier one
    /// has no threshold.
    pub const RATE_TIERS: &[(&str, Option<&str>)] = &[
        (BUY_RATE, None),
        (BUY_RATE_2, Some(PLACEMENT_DATE)),
        (BUY_RATE_3, Some(PLACEMENT_DATE_2)),
        (BUY_RATE_4, Some(PLACEMENT_DATE_3)),
        (BUY_RATE_5, Some(PLACEMENT_DATE_4)),
    ];

    /// Schema of the planned-cost dictionary.
    pub const PLAN_ALL: &[&str] = &[FPN, super::columns::PLANNED_NET_COST];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, JsonSchema)]
pub enum BuyModel {
    #[schemars(description = "Cost per thousand impressions")]
    Cpm,

    #[schemars(description = "Cost per click")]
    Cpc,

    #[schemars(description = "Cost per video view")]
    Cpv,

    #[schemars(description = "Cost per completed video view")]
    Cpcv,

    #[schemars(description = "Cost per landing page view")]
    Cplp,

    #[schemars(description = "Cost per thousand video views")]
    Cpvm,

    #[schemars(description = "Cost per thousand viewable (active view) impressions")]
    Av,

    #[schemars(
        description = "One fixed fee billed on the placement date, shared by click volume across the placement group"
    )]
    Flat,

    #[schemars(
        description = "One fixed fee billed on the placement date, shared by impression volume across the placement group"
    )]
    FlatImp,

    #[schemars(description = "Programmatic spend with the platform margin backed out (cost / 0.85)")]
    ProgrammaticAdjusted,

    #[schemars(description = "Date-tiered cost per acquisition using up to the given number of rate tiers (1-5)")]
    Cpa(u8),

    #[schemars(description = "Cost per acquisition before the placement date, cost per thousand impressions on and after it")]
    CpaCpm,

    #[schemars(description = "New-user rate times new users plus signup rate times signups")]
    CpnuCpsu,

    #[schemars(description = "Cost per engagement")]
    Cpe,
}

impl BuyModel {
    /// Resolves a dictionary `Buy Model` cell. Blank and unknown names return
    /// `None`, meaning the raw spend passes through.
    pub fn parse(raw: &str) -> Option<Self> {
        let name = raw.trim();
        let model = match name.to_ascii_uppercase().as_str() {
            "CPM" => BuyModel::Cpm,
            "CPC" => BuyModel::Cpc,
            "CPV" => BuyModel::Cpv,
            "CPCV" => BuyModel::Cpcv,
            "CPLP" => BuyModel::Cplp,
            "CPVM" => BuyModel::Cpvm,
            "AV" => BuyModel::Av,
            "FLAT" => BuyModel::Flat,
            "FLATIMP" => BuyModel::FlatImp,
            "PROGRAMMATIC" | "PROGRAMMADDICT" | "PROGRAMMATIC-ADJUSTED" => {
                BuyModel::ProgrammaticAdjusted
            }
            "CPA" => BuyModel::Cpa(1),
            "CPA2" => BuyModel::Cpa(2),
            "CPA3" => BuyModel::Cpa(3),
            "CPA4" => BuyModel::Cpa(4),
            "CPA5" => BuyModel::Cpa(5),
            "CPA/CPM" => BuyModel::CpaCpm,
            "CPNU/CPSU" => BuyModel::CpnuCpsu,
            "CPE" => BuyModel::Cpe,
            _ => return None,
        };
        Some(model)
    }

    /// The delivery metrics this model reads, besides rates and dates.
    pub fn required_metrics(&self) -> &'static [&'static str] {
        use columns::*;
        match self {
            BuyModel::Cpm => &[IMPRESSIONS],
            BuyModel::Cpc => &[CLICKS],
            BuyModel::Cpv => &[VIDEO_VIEWS],
            BuyModel::Cpcv => &[VIDEO_VIEWS_100],
            BuyModel::Cplp => &[LANDING_PAGE],
            BuyModel::Cpvm => &[VIDEO_VIEWS],
            BuyModel::Av => &[VIEWABLE_IMPRESSIONS],
            BuyModel::Flat => &[CLICKS],
            BuyModel::FlatImp => &[IMPRESSIONS],
            BuyModel::ProgrammaticAdjusted => &[NET_COST],
            BuyModel::Cpa(_) => &[CONVERSIONS],
            BuyModel::CpaCpm => &[CONVERSIONS, IMPRESSIONS],
            BuyModel::CpnuCpsu => &[NEW_USERS, SIGNUPS],
            BuyModel::Cpe => &[ENGAGEMENTS],
        }
    }
}

impl fmt::Display for BuyModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuyModel::Cpm => write!(f, "CPM"),
            BuyModel::Cpc => write!(f, "CPC"),
            BuyModel::Cpv => write!(f, "CPV"),
            BuyModel::Cpcv => write!(f, "CPCV"),
            BuyModel::Cplp => write!(f, "CPLP"),
            BuyModel::Cpvm => write!(f, "CPVM"),
            BuyModel::Av => write!(f, "AV"),
            BuyModel::Flat => write!(f, "Flat"),
            BuyModel::FlatImp => write!(f, "FlatImp"),
            BuyModel::ProgrammaticAdjusted => write!(f, "Programmatic"),
            BuyModel::Cpa(1) => write!(f, "CPA"),
            BuyModel::Cpa(n) => write!(f, "CPA{}", n),
            BuyModel::CpaCpm => write!(f, "CPA/CPM"),
            BuyModel::CpnuCpsu => write!(f, "CPNU/CPSU"),
            BuyModel::Cpe => write!(f, "CPE"),
        }
    }
}

/// Pricing unit of an ancillary rate (serving, verification, reporting).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum RateModel {
    #[schemars(description = "Rate applies per thousand impressions")]
    Cpm,
    #[schemars(description = "Rate applies per click")]
    Cpc,
}
