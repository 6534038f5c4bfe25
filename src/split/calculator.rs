use serde::Serialize;

/// Upper bound for an organizer commission rate (50%).
pub const MAX_COMMISSION_BPS: i32 = 5_000;

const BPS_DENOMINATOR: i128 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct Split {
    pub commission_amount: i64,
    pub gateway_fee_amount: i64,
    pub payout_amount: i64,
    /// Commission plus fee consumed the whole gross; payout was clamped to zero.
    pub insufficient_payout: bool,
}

/// `round(gross * bps / 10_000)`, half away from zero, for non-negative inputs.
pub fn share_of(gross: i64, bps: i32) -> i64 {
    let gross = i128::from(gross.max(0));
    let bps = i128::from(bps.max(0));
    ((gross * bps + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR) as i64
}

/// Split `gross` into commission, gateway fee and organizer payout.
///
/// The three parts always sum to `gross` and the payout is never negative.
/// When commission and fee reach the gross, the payout is zero, the
/// commission absorbs whatever the fee leaves, and `insufficient_payout` is
/// set.
pub fn compute_split(gross: i64, commission_bps: i32, gateway_fee_bps: i32) -> Split {
    let gross = gross.max(0);
    let commission = share_of(gross, commission_bps.clamp(0, MAX_COMMISSION_BPS));
    let fee = share_of(gross, gateway_fee_bps);

    if commission + fee >= gross {
        let gateway_fee_amount = fee.min(gross);
        return Split {
            commission_amount: gross - gateway_fee_amount,
            gateway_fee_amount,
            payout_amount: 0,
            insufficient_payout: true,
        };
    }

    Split {
        commission_amount: commission,
        gateway_fee_amount: fee,
        payout_amount: gross - commission - fee,
        insufficient_payout: false,
    }
}

/// Split for payments the platform keeps in full, such as subscriptions.
pub fn platform_revenue_split(gross: i64, gateway_fee_bps: i32) -> Split {
    let gross = gross.max(0);
    let gateway_fee_amount = share_of(gross, gateway_fee_bps).min(gross);
    Split {
        commission_amount: gross - gateway_fee_amount,
        gateway_fee_amount,
        payout_amount: 0,
        insufficient_payout: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_reference_order() {
        let split = compute_split(50_000, 500, 180);
        assert_eq!(split.commission_amount, 2_500);
        assert_eq!(split.gateway_fee_amount, 900);
        assert_eq!(split.payout_amount, 46_600);
        assert!(!split.insufficient_payout);
    }

    #[test]
    fn rounds_half_up() {
        // 101 * 5% = 5.05, 150 * 1.8% = 2.7
        assert_eq!(share_of(101, 500), 5);
        assert_eq!(share_of(150, 180), 3);
        assert_eq!(share_of(10, 500), 1);
    }

    #[test]
    fn clamps_payout_instead_of_going_negative() {
        let split = compute_split(1, 5_000, 180);
        assert_eq!(split.payout_amount, 0);
        assert!(split.insufficient_payout);
        assert_eq!(
            split.commission_amount + split.gateway_fee_amount + split.payout_amount,
            1
        );
    }

    #[test]
    fn commission_rate_is_capped() {
        let capped = compute_split(10_000, 9_000, 0);
        assert_eq!(capped.commission_amount, 5_000);
    }

    #[test]
    fn platform_revenue_pays_out_nothing() {
        let split = platform_revenue_split(50_000, 180);
        assert_eq!(split.payout_amount, 0);
        assert_eq!(split.gateway_fee_amount, 900);
        assert_eq!(split.commission_amount, 49_100);
    }
}
