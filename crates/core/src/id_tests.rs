// SPDX-License-Identifier: MIT

use super::*;

#[test]
fn vm_uuid_roundtrips_through_display_and_parse() {
    let id = VmUuid::new();
    let parsed: VmUuid = id.to_string().parse().unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn vm_uuid_serde_is_a_bare_string() {
    let id = VmUuid::parse("3fa7b4aa-1234-4a11-8b77-9a3a5f2b6c11").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"3fa7b4aa-1234-4a11-8b77-9a3a5f2b6c11\"");

    let back: VmUuid = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn vm_uuid_short_truncates() {
    let id = VmUuid::parse("3fa7b4aa-1234-4a11-8b77-9a3a5f2b6c11").unwrap();
    assert_eq!(id.short(8), "3fa7b4aa");
}

#[test]
fn vm_uuid_rejects_garbage() {
    assert!(VmUuid::parse("not-a-uuid").is_err());
}
