mod keystore;

use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use clap::{Args, Parser, Subcommand};
use serde_json::{Map, Value};

use keystore::{KeystoreError, StoredKeys};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error(transparent)]
    Keystore(#[from] KeystoreError),
    #[error("cannot read {path}: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("unsupported image type `{0}`; use png, jpg, webp or gif")]
    UnsupportedImage(String),
    #[error("no key for {0}; pass --key or run `keys set {0} <key>`")]
    MissingKey(String),
    #[error("server returned {status}: {message}")]
    ServerError { status: u16, message: String },
}

#[derive(Parser, Debug)]
#[command(name = "recipe-cli", about = "Recipe Genius API CLI")]
struct Cli {
    #[arg(long, env = "RECIPE_BASE_URL", default_value = "http://127.0.0.1:3000")]
    base_url: String,

    #[arg(long, env = "RECIPE_KEYSTORE", help = "Key file (default: ~/.recipe-genius-keys.json)")]
    keystore: Option<PathBuf>,

    #[arg(long, default_value_t = false, help = "Do not send stored keys with requests")]
    server_keys_only: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug)]
struct CliContext {
    base_url: String,
    keystore: PathBuf,
    server_keys_only: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the server health snapshot.
    Health,
    /// Generate a recipe from ingredients.
    Recipe(RecipeArgs),
    /// Analyze the nutrition of a recipe JSON file.
    Nutrition {
        #[arg(help = "Recipe JSON file, or - for stdin")]
        recipe: String,
    },
    /// Recognize ingredients in a photo.
    Recognize {
        image: PathBuf,
        #[arg(long)]
        max_retries: Option<u32>,
        #[arg(long, help = "Per-attempt timeout in milliseconds")]
        timeout_ms: Option<u64>,
    },
    /// Check that a provider key works.
    TestKey {
        provider: String,
        #[arg(long, help = "Key to test; defaults to the stored key")]
        key: Option<String>,
        #[arg(long)]
        endpoint_id: Option<String>,
    },
    /// Manage the local key file.
    Keys(KeysCommand),
}

#[derive(Args, Debug)]
struct RecipeArgs {
    #[arg(required = true, num_args = 1..)]
    ingredients: Vec<String>,
    #[arg(long = "restriction")]
    dietary_restrictions: Vec<String>,
    #[arg(long = "allergy")]
    allergies: Vec<String>,
    #[arg(long = "condition")]
    health_conditions: Vec<String>,
    #[arg(long = "cuisine")]
    cuisine_type: Vec<String>,
    #[arg(long, default_value_t = 30)]
    cooking_time: u32,
    #[arg(long, default_value_t = 2)]
    servings: u32,
    #[arg(long, default_value = "easy")]
    difficulty: String,
    #[arg(long, help = "Preferred provider; defaults to the stored preference")]
    provider: Option<String>,
}

#[derive(Args, Debug)]
struct KeysCommand {
    #[command(subcommand)]
    command: KeysSubcommand,
}

#[derive(Subcommand, Debug)]
enum KeysSubcommand {
    /// Store a key (or `doubaoEndpointId` / `preferredRecipeProvider`).
    Set { field: String, value: String },
    /// List stored fields with keys masked.
    List,
    Remove { field: String },
    /// Print the key file location.
    Path,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let ctx = CliContext {
        base_url: cli.base_url,
        keystore: cli.keystore.unwrap_or_else(keystore::default_path),
        server_keys_only: cli.server_keys_only,
    };

    match cli.command {
        Command::Health => run_health(&ctx).await,
        Command::Recipe(args) => run_recipe(&ctx, args).await,
        Command::Nutrition { recipe } => run_nutrition(&ctx, &recipe).await,
        Command::Recognize { image, max_retries, timeout_ms } => {
            run_recognize(&ctx, &image, max_retries, timeout_ms).await
        }
        Command::TestKey { provider, key, endpoint_id } => run_test_key(&ctx, provider, key, endpoint_id).await,
        Command::Keys(keys) => run_keys(&ctx, keys),
    }
}

async fn run_health(ctx: &CliContext) -> Result<(), CliError> {
    let url = format!("{}/health", ctx.base_url.trim_end_matches('/'));
    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    let json = response.json::<Value>().await?;
    print_json(&json)?;
    if !status.is_success() {
        return Err(CliError::ServerError { status: status.as_u16(), message: "service degraded".to_owned() });
    }
    Ok(())
}

async fn run_recipe(ctx: &CliContext, args: RecipeArgs) -> Result<(), CliError> {
    let keys = stored_keys(ctx)?;
    let mut body = serde_json::json!({
        "ingredients": args.ingredients,
        "preferences": {
            "dietaryRestrictions": args.dietary_restrictions,
            "allergies": args.allergies,
            "healthConditions": args.health_conditions,
            "cuisineType": args.cuisine_type,
            "cookingTime": args.cooking_time,
            "servings": args.servings,
            "difficulty": args.difficulty,
        },
        "apiKeys": keys.api_keys_json(),
    });
    if let Some(provider) = args.provider.as_deref().or_else(|| keys.get("preferredRecipeProvider")) {
        body["preferredProvider"] = Value::String(provider.to_owned());
    }
    let json = post(ctx, "/generate-recipe", body).await?;
    print_json(&json)
}

async fn run_nutrition(ctx: &CliContext, recipe: &str) -> Result<(), CliError> {
    let raw = if recipe == "-" {
        std::io::read_to_string(std::io::stdin())
            .map_err(|source| CliError::ReadFile { path: PathBuf::from("-"), source })?
    } else {
        std::fs::read_to_string(recipe).map_err(|source| CliError::ReadFile { path: recipe.into(), source })?
    };
    let mut recipe = serde_json::from_str::<Value>(&raw)?;
    // Accept the full `/generate-recipe` response as well as a bare recipe.
    if let Some(inner) = recipe.pointer_mut("/data/recipe").map(Value::take) {
        recipe = inner;
    }
    let keys = stored_keys(ctx)?;
    let json = post(ctx, "/analyze-nutrition", serde_json::json!({ "recipe": recipe, "apiKeys": keys.api_keys_json() }))
        .await?;
    print_json(&json)
}

async fn run_recognize(
    ctx: &CliContext,
    image: &Path,
    max_retries: Option<u32>,
    timeout_ms: Option<u64>,
) -> Result<(), CliError> {
    let data_url = image_data_url(image)?;
    let keys = stored_keys(ctx)?;
    let mut options = Map::new();
    if let Some(n) = max_retries {
        options.insert("maxRetries".to_owned(), n.into());
    }
    if let Some(ms) = timeout_ms {
        options.insert("timeout".to_owned(), ms.into());
    }
    let body = serde_json::json!({
        "imageDataUrl": data_url,
        "apiKeys": keys.api_keys_json(),
        "options": options,
    });
    let json = post(ctx, "/recognize-ingredients", body).await?;
    print_json(&json)
}

async fn run_test_key(
    ctx: &CliContext,
    provider: String,
    key: Option<String>,
    endpoint_id: Option<String>,
) -> Result<(), CliError> {
    let keys = keystore::load(&ctx.keystore)?;
    let key = key
        .or_else(|| keys.get(&provider).map(str::to_owned))
        .ok_or_else(|| CliError::MissingKey(provider.clone()))?;
    if !keystore::looks_valid(&provider, &key) {
        eprintln!("warning: {provider} key {} does not look like a valid key", keystore::mask(&key));
    }
    let endpoint_id = endpoint_id.or_else(|| keys.get("doubaoEndpointId").map(str::to_owned));
    let body = serde_json::json!({ "provider": provider, "apiKey": key, "endpointId": endpoint_id });
    let json = post(ctx, "/test-api-key", body).await?;
    print_json(&json)
}

fn run_keys(ctx: &CliContext, keys: KeysCommand) -> Result<(), CliError> {
    let path = &ctx.keystore;
    match keys.command {
        KeysSubcommand::Set { field, value } => {
            let mut stored = keystore::load(path)?;
            if is_secret(&field) && !keystore::looks_valid(&field, &value) {
                eprintln!("warning: {field} key does not look like a valid key");
            }
            stored.set(&field, &value)?;
            keystore::save(path, &stored)?;
            println!("saved {field} to {}", path.display());
        }
        KeysSubcommand::List => {
            let stored = keystore::load(path)?;
            if stored.is_empty() {
                println!("no keys stored in {}", path.display());
            }
            for (field, value) in stored.iter() {
                let shown = if is_secret(field) { keystore::mask(value) } else { value.to_owned() };
                println!("{field}\t{shown}");
            }
        }
        KeysSubcommand::Remove { field } => {
            let mut stored = keystore::load(path)?;
            if stored.remove(&field) {
                keystore::save(path, &stored)?;
                println!("removed {field}");
            } else {
                println!("{field} was not stored");
            }
        }
        KeysSubcommand::Path => println!("{}", path.display()),
    }
    Ok(())
}

fn is_secret(field: &str) -> bool {
    !matches!(field, "doubaoEndpointId" | "preferredRecipeProvider")
}

fn stored_keys(ctx: &CliContext) -> Result<StoredKeys, CliError> {
    if ctx.server_keys_only {
        return Ok(StoredKeys::default());
    }
    Ok(keystore::load(&ctx.keystore)?)
}

/// POST `body` and return the envelope, or the envelope's `error` text on a
/// non-2xx status.
async fn post(ctx: &CliContext, path: &str, body: Value) -> Result<Value, CliError> {
    let url = format!("{}{}", ctx.base_url.trim_end_matches('/'), path);
    let response = reqwest::Client::new().post(url).json(&body).send().await?;
    let status = response.status();
    let json = response.json::<Value>().await?;
    if !status.is_success() {
        let message = json
            .get("error")
            .and_then(Value::as_str)
            .map_or_else(|| json.to_string(), str::to_owned);
        return Err(CliError::ServerError { status: status.as_u16(), message });
    }
    Ok(json)
}

/// `data:image/<type>;base64,<bytes>` for a local image file.
fn image_data_url(path: &Path) -> Result<String, CliError> {
    let mime = image_mime(path)?;
    let bytes = std::fs::read(path).map_err(|source| CliError::ReadFile { path: path.to_path_buf(), source })?;
    Ok(format!("data:{mime};base64,{}", STANDARD.encode(bytes)))
}

fn image_mime(path: &Path) -> Result<&'static str, CliError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        "webp" => Ok("image/webp"),
        "gif" => Ok("image/gif"),
        _ => Err(CliError::UnsupportedImage(ext)),
    }
}

fn print_json(value: &Value) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
