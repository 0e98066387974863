use clap::{value_parser, Arg, Command};
use colored::Colorize;
use streamgate::gateway::{Role, TokenIssuer, TokenVerifier};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = Command::new("Token Tool")
        .version("1.0")
        .about("streamgate credential tooling")
        .subcommand_required(true)
        .subcommand(Command::new("keygen").about("Generate a new ed25519 key pair"))
        .subcommand(
            Command::new("issue")
                .about("Issue a signed client token")
                .arg(
                    Arg::new("secret")
                        .short('s')
                        .long("secret")
                        .value_name("BASE64")
                        .help("Base64 signing key (from `keygen`)")
                        .required(true),
                )
                .arg(
                    Arg::new("user")
                        .short('u')
                        .long("user")
                        .value_name("USER_ID")
                        .help("Subject the token is issued to")
                        .required(true),
                )
                .arg(
                    Arg::new("role")
                        .short('r')
                        .long("role")
                        .value_name("ROLE")
                        .help("user | admin | super_admin")
                        .default_value("user"),
                )
                .arg(
                    Arg::new("ttl")
                        .long("ttl")
                        .value_name("SECONDS")
                        .value_parser(value_parser!(i64))
                        .help("Validity from now, in seconds")
                        .default_value("3600"),
                ),
        )
        .subcommand(
            Command::new("verify")
                .about("Check a token against a public key")
                .arg(
                    Arg::new("public_key")
                        .short('p')
                        .long("public-key")
                        .value_name("BASE64")
                        .help("Base64 verifying key (auth.public_key)")
                        .required(true),
                )
                .arg(
                    Arg::new("token")
                        .value_name("TOKEN")
                        .help("Token to verify")
                        .required(true),
                ),
        )
        .get_matches();

    match matches.subcommand() {
        Some(("keygen", _)) => {
            let issuer = TokenIssuer::generate();
            println!("🔐 Generated new key pair\n");
            println!("{} {}", "Public key:".bold(), issuer.public_key_base64());
            println!("{} {}", "Secret key:".bold(), issuer.secret_key_base64());
            println!(
                "\n{}",
                "Put the public key in auth.public_key; keep the secret key off the gateway host."
                    .yellow()
            );
        }

        Some(("issue", sub_matches)) => {
            let secret = sub_matches
                .get_one::<String>("secret")
                .ok_or("missing --secret")?;
            let user = sub_matches
                .get_one::<String>("user")
                .ok_or("missing --user")?;
            let role_name = sub_matches
                .get_one::<String>("role")
                .ok_or("missing --role")?;
            let ttl = *sub_matches.get_one::<i64>("ttl").ok_or("missing --ttl")?;

            let role = Role::from_str(role_name)
                .ok_or_else(|| format!("Unknown role '{}'", role_name))?;
            if ttl <= 0 {
                return Err("--ttl must be positive".into());
            }

            let issuer = TokenIssuer::from_base64(secret)?;
            let token = issuer.issue_for(user, role, ttl)?;
            println!("{}", token);
        }

        Some(("verify", sub_matches)) => {
            let public_key = sub_matches
                .get_one::<String>("public_key")
                .ok_or("missing --public-key")?;
            let token = sub_matches
                .get_one::<String>("token")
                .ok_or("missing token")?;

            let verifier = TokenVerifier::from_base64(public_key, 0)?;
            match verifier.verify(token) {
                Ok(identity) => {
                    println!(
                        "{} user={} role={}",
                        "✅ Valid".green(),
                        identity.user_id,
                        identity.role
                    );
                }
                Err(e) => {
                    println!("{} {}", "❌ Invalid:".red(), e);
                    std::process::exit(1);
                }
            }
        }

        _ => unreachable!("subcommand_required"),
    }

    Ok(())
}
