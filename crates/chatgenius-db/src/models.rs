/// Auth row: a user joined with its password hash.
/// Kept out of the JSON table API so hashes never leave the auth module.
pub struct CredentialRow {
    pub user_id: String,
    pub username: String,
    pub password: String,
}
