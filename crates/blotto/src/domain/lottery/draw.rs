//! Deterministic winner selection from a block hash.
//!
//! Given the same hash, prize pool and bets, the draw is a total function,
//! anyone can replay it to verify the published winners.

use num_bigint::BigUint;

use crate::domain::stores::{Bet, Winner};

/// Prize pool percentages. Each tier halves the previous one; the final
/// halving (0.390625%) is the service fee and is not paid out.
pub const PRIZE_PERCENTS: [f64; 8] = [50.0, 25.0, 12.5, 6.25, 3.125, 1.5625, 0.78125, 0.390625];

/// Selects one winner per prize tier.
///
/// Hash bytes are consumed in pairs from the end, two fresh bytes per
/// tier. The hash must already be in display order (reversed from the
/// node's serialization) and the bets sorted by index.
pub fn compute_winners(block_hash: &[u8], prize_pool: u64, bets: &[Bet]) -> Vec<Winner> {
    if bets.is_empty() || prize_pool == 0 {
        return Vec::new();
    }

    let mut winners = Vec::with_capacity(PRIZE_PERCENTS.len());
    let mut i = block_hash.len() - 1;

    for percent in PRIZE_PERCENTS {
        let ticket = winning_ticket(block_hash, i, prize_pool);
        let prize = ((percent / 100.0) * prize_pool as f64).round() as u64;

        winners.push(Winner {
            public_key: owner_of(bets, ticket),
            ticket,
            prize,
        });

        i -= 2;
    }

    winners
}

/// Takes two bytes from the block hash to derive the winning number.
///
/// `num1 ^ num2` overflows any fixed-width integer when the bytes get
/// close to 255, so the exponentiation runs over big integers.
fn winning_ticket(hash: &[u8], i: usize, prize_pool: u64) -> u64 {
    let num1 = BigUint::from(hash[i]);
    let num2 = BigUint::from(hash[i - 1]);

    let result = num1.modpow(&num2, &BigUint::from(prize_pool));

    // Add one so index zero is never drawn and the highest index is
    let ticket: u64 = result.try_into().expect("modpow result is below the prize pool");
    ticket + 1
}

/// Binary search for the bet owning the ticket: the one with the smallest
/// index greater than or equal to it.
fn owner_of(bets: &[Bet], ticket: u64) -> String {
    let position = bets.partition_point(|bet| bet.index < ticket);
    bets[position.min(bets.len() - 1)].public_key.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bet(public_key: &str, index: u64) -> Bet {
        Bet {
            public_key: public_key.to_string(),
            index,
            tickets: 0,
        }
    }

    #[test]
    fn test_known_block_hash_draw() {
        let hash =
            hex::decode("000000000000000000001badcbb5d10b486a18a97ac9d6e08d526a62aa9a360e")
                .unwrap();
        let bets = vec![bet("pk", 1000)];

        let winners = compute_winners(&hash, 1000, &bets);

        let tickets: Vec<u64> = winners.iter().map(|w| w.ticket).collect();
        assert_eq!(tickets, vec![417, 777, 865, 833, 977, 402, 322, 337]);
    }

    #[test]
    fn test_prizes_follow_halving_table() {
        let hash = [0xffu8; 32];
        let bets = vec![bet("pk", 1_000_000)];

        let winners = compute_winners(&hash, 1_000_000, &bets);

        let prizes: Vec<u64> = winners.iter().map(|w| w.prize).collect();
        assert_eq!(
            prizes,
            vec![500_000, 250_000, 125_000, 62_500, 31_250, 15_625, 7_813, 3_906]
        );
    }

    #[test]
    fn test_prize_conservation() {
        let hash = [0xabu8; 32];
        for pool in [999u64, 1000, 123_457, 21_000_000] {
            let bets = vec![bet("pk", pool)];
            let winners = compute_winners(&hash, pool, &bets);

            let total: u64 = winners.iter().map(|w| w.prize).sum();
            let expected: u64 = PRIZE_PERCENTS
                .iter()
                .map(|p| ((p / 100.0) * pool as f64).round() as u64)
                .sum();
            assert_eq!(total, expected);

            // Within rounding, the payout is the pool minus the fee tier
            let fee = pool as f64 * 0.00390625;
            assert!((total as f64 - (pool as f64 - fee)).abs() <= 8.0, "pool {}", pool);
        }
    }

    #[test]
    fn test_owner_lookup() {
        let bets = vec![bet("1", 427224), bet("2", 1427224), bet("3", 1527224)];

        assert_eq!(owner_of(&bets, 15), "1");
        assert_eq!(owner_of(&bets, 427224), "1");
        assert_eq!(owner_of(&bets, 427225), "2");
        assert_eq!(owner_of(&bets, 1000000), "2");
        assert_eq!(owner_of(&bets, 1527224), "3");
    }

    #[test]
    fn test_draw_is_deterministic() {
        let hash = [0x5au8; 32];
        let bets = vec![bet("a", 600), bet("b", 1000)];

        let first = compute_winners(&hash, 1000, &bets);
        let second = compute_winners(&hash, 1000, &bets);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_bets_draw_nothing() {
        let hash = [0x11u8; 32];
        assert!(compute_winners(&hash, 0, &[]).is_empty());
    }

    #[test]
    fn test_extreme_bytes_need_big_integers() {
        // 255^255 mod P must not wrap, the winning ticket stays in range
        let hash = [0xffu8; 32];
        let pool = u64::MAX / 2;
        let bets = vec![bet("pk", pool)];

        let winners = compute_winners(&hash, pool, &bets);
        for winner in winners {
            assert!(winner.ticket >= 1 && winner.ticket <= pool);
        }
    }
}
