use super::*;

#[test]
fn mul_div255_edges() {
    assert_eq!(mul_div255_u8(255, 255), 255);
    assert_eq!(mul_div255_u8(0, 255), 0);
    assert_eq!(mul_div255_u8(128, 255), 128);
}

#[test]
fn prev_power_of_two_floors() {
    assert_eq!(prev_power_of_two(0), 1);
    assert_eq!(prev_power_of_two(1), 1);
    assert_eq!(prev_power_of_two(3), 2);
    assert_eq!(prev_power_of_two(8), 8);
    assert_eq!(prev_power_of_two(1023), 512);
}

#[test]
fn hash_unit_is_deterministic_and_in_range() {
    let a = hash_unit_f32(7, 3, 4, 0);
    let b = hash_unit_f32(7, 3, 4, 0);
    assert_eq!(a.to_bits(), b.to_bits());
    assert_ne!(hash_unit_f32(7, 3, 4, 1).to_bits(), a.to_bits());

    for x in 0..64 {
        let v = hash_unit_f32(1, x, x * 3, 2);
        assert!((0.0..1.0).contains(&v));
    }
}
