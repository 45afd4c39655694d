use std::collections::BTreeMap;

use remote_gateway::{Role, TeamMember};

pub fn roster_by_role(members: &[TeamMember]) -> BTreeMap<Role, Vec<&TeamMember>> {
    let mut groups: BTreeMap<Role, Vec<&TeamMember>> = BTreeMap::new();
    for member in members {
        groups.entry(member.role).or_default().push(member);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_gateway::Record;
    use serde_json::json;

    fn member(id: &str, role: &str) -> TeamMember {
        TeamMember::from_row(json!({
            "user_id": id,
            "role": role,
            "email": format!("{id}@example.com"),
            "joined_at": "2024-01-01T00:00:00Z",
        }))
        .unwrap()
    }

    #[test]
    fn owners_sort_first() {
        let members = vec![member("c", "member"), member("a", "owner"), member("d", "member")];
        let groups = roster_by_role(&members);

        let roles: Vec<Role> = groups.keys().copied().collect();
        assert_eq!(roles, vec![Role::Owner, Role::Member]);
        assert_eq!(groups[&Role::Member].len(), 2);
    }
}
