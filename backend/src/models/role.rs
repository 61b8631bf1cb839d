use serde::{Deserialize, Serialize};

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "user_role", rename_all = "snake_case")]
pub enum Role {
    Teacher,
    Student,
    Parent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
        }
    }

    /// Parent ids look like `P-CS20230008`, teacher ids like `T-0001`;
    /// anything else is a student id.
    pub fn from_login_id(login_id: &str) -> Role {
        if login_id.starts_with("P-") {
            Role::Parent
        } else if login_id.starts_with("T-") {
            Role::Teacher
        } else {
            Role::Student
        }
    }

    /// Students and parents may sign in with a bare id instead of an e-mail.
    pub fn accepts_bare_login_id(&self) -> bool {
        matches!(self, Role::Student | Role::Parent)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_id_prefix_selects_role() {
        assert_eq!(Role::from_login_id("P-CS20230008"), Role::Parent);
        assert_eq!(Role::from_login_id("T-0042"), Role::Teacher);
        assert_eq!(Role::from_login_id("CS20230008"), Role::Student);
        assert_eq!(Role::from_login_id("p-lowercase"), Role::Student);
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Parent).unwrap(), "\"parent\"");
        let role: Role = serde_json::from_str("\"teacher\"").unwrap();
        assert_eq!(role, Role::Teacher);
    }
}
