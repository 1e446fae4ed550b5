// Copyright (C) 2026 VanguardReport
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use lambda_http::run as lambda_run;
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;
use vanguard_common::{
    Armor, CharacterRef, EnrichedRow, ItemStub, Loadout, MatchParticipant, PlatformFlag,
    PlatformPlayerId, StubKind, UNKNOWN_SUBCLASS, Weapon, WeaponCategory, profile_url,
};

const TRIALS_HELP: &str = "usage: /trials [gamertag]\n\
    Shows the fireteam from the gamertag's last Trials of Osiris match:\n\
    elo rating, K/D, subclass and equipped weapons per player.\n\
    Without a gamertag your own handle is used.";

const XUR_HELP: &str = "usage: /xur\nLists the exotic items Xur is currently selling.";

const XUR_UNAVAILABLE: &str = "Xur is not available at the moment...";

#[derive(Clone)]
struct AppState {
    identity: Arc<dyn IdentityService>,
    stats: Arc<dyn StatsService>,
    game_state: Arc<dyn GameStateService>,
    catalog: Arc<dyn CatalogStore>,
}

impl AppState {
    fn from_env() -> anyhow::Result<Self> {
        let bungie = Arc::new(BungieClient::from_env());
        Ok(Self {
            identity: bungie.clone(),
            stats: Arc::new(EloStatsClient::from_env()),
            game_state: bungie,
            catalog: Arc::new(FileCatalogStore::from_env()),
        })
    }
}

/// Result of an identity lookup. "Not found" is a normal outcome: `id` is
/// `None` and `handle` echoes the gamertag that was searched for, so the
/// response can still name it.
#[derive(Debug, Clone)]
struct IdentityLookup {
    id: Option<PlatformPlayerId>,
    handle: String,
}

#[async_trait]
trait IdentityService: Send + Sync {
    async fn resolve(
        &self,
        requester_handle: &str,
        query: Option<&str>,
    ) -> anyhow::Result<IdentityLookup>;
}

#[async_trait]
trait StatsService: Send + Sync {
    async fn match_participants(
        &self,
        id: &PlatformPlayerId,
    ) -> anyhow::Result<Vec<MatchParticipant>>;
}

#[async_trait]
trait GameStateService: Send + Sync {
    async fn last_played_character(
        &self,
        id: &PlatformPlayerId,
    ) -> anyhow::Result<Option<CharacterRef>>;

    async fn inventory(
        &self,
        id: &PlatformPlayerId,
        character_id: &str,
    ) -> anyhow::Result<Option<Loadout>>;

    async fn current_vendor_stock(&self) -> anyhow::Result<Option<Vec<ItemStub>>>;
}

#[async_trait]
trait CatalogStore: Send + Sync {
    async fn connect(&self) -> anyhow::Result<Arc<dyn CatalogConnection>>;
}

/// One open catalog handle, shared by all lookups of a single report.
/// Batched lookups silently omit ids the catalog does not know.
#[async_trait]
trait CatalogConnection: Send + Sync {
    async fn weapon(&self, id: u32) -> anyhow::Result<Option<Weapon>>;
    async fn armor_piece(&self, id: u32) -> anyhow::Result<Option<Armor>>;
    async fn weapons(&self, ids: &[u32]) -> anyhow::Result<Vec<Weapon>>;
    async fn armor_pieces(&self, ids: &[u32]) -> anyhow::Result<Vec<Armor>>;
    async fn close(&self) -> anyhow::Result<()>;
}

// Inventory bucket hashes from the game's item manifest.
const BUCKET_PRIMARY_WEAPON: u32 = 1498876634;
const BUCKET_SPECIAL_WEAPON: u32 = 2465295065;
const BUCKET_HEAVY_WEAPON: u32 = 953998645;
const BUCKET_HELMET: u32 = 3448274439;
const BUCKET_GAUNTLETS: u32 = 3551918588;
const BUCKET_CHEST: u32 = 14239492;
const BUCKET_LEGS: u32 = 20886954;
const BUCKET_CLASS_ITEM: u32 = 1585787867;
const BUCKET_SUBCLASS: u32 = 3284755031;

const WEAPON_BUCKETS: [u32; 3] = [
    BUCKET_PRIMARY_WEAPON,
    BUCKET_SPECIAL_WEAPON,
    BUCKET_HEAVY_WEAPON,
];

const ARMOR_BUCKETS: [u32; 5] = [
    BUCKET_HELMET,
    BUCKET_GAUNTLETS,
    BUCKET_CHEST,
    BUCKET_LEGS,
    BUCKET_CLASS_ITEM,
];

fn subclass_name(item_hash: u32) -> &'static str {
    match item_hash {
        2007186000 => "Striker",
        21395672 => "Defender",
        1716862031 => "Gunslinger",
        4143670657 => "Bladedancer",
        3658182170 => "Sunsinger",
        3828867689 => "Voidwalker",
        1256644900 => "Stormcaller",
        3105935002 => "Sunbreaker",
        3225959819 => "Nightstalker",
        _ => UNKNOWN_SUBCLASS,
    }
}

/// Client for the game's platform API: player search, account summary,
/// per-character inventory and the vendor advisor.
#[derive(Clone)]
struct BungieClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    default_platform: PlatformFlag,
}

impl BungieClient {
    fn from_env() -> Self {
        let default_platform = match std::env::var("DEFAULT_PLATFORM").ok().as_deref() {
            Some("PLAYSTATION") => PlatformFlag::Playstation,
            _ => PlatformFlag::Xbox,
        };
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("GAME_API_BASE_URL")
                .ok()
                .unwrap_or_else(|| "https://www.bungie.net/d1/Platform/Destiny".to_string()),
            api_key: std::env::var("GAME_API_KEY").ok().unwrap_or_default(),
            default_platform,
        }
    }

    async fn get_envelope<T: serde::de::DeserializeOwned>(
        &self,
        url: String,
        what: &str,
    ) -> anyhow::Result<Option<T>> {
        let response = self
            .client
            .get(&url)
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("failed to fetch {what}"))?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".to_string());
            anyhow::bail!("game API returned {} for {}: {}", status, what, body);
        }
        let envelope = response
            .json::<GameApiEnvelope<T>>()
            .await
            .with_context(|| format!("invalid {what} payload"))?;
        Ok(envelope.response)
    }

    async fn search_player(
        &self,
        platform: PlatformFlag,
        handle: &str,
    ) -> anyhow::Result<Option<PlatformPlayerId>> {
        let url = search_url(&self.base_url, platform, handle)?;
        let hits: Option<Vec<PlayerSearchHit>> = self.get_envelope(url, "player search").await?;
        Ok(hits
            .unwrap_or_default()
            .into_iter()
            .next()
            .map(|hit| PlatformPlayerId {
                platform,
                membership_id: hit.membership_id,
            }))
    }
}

/// Handles are free text, so the search path segment is percent-encoded
/// rather than interpolated raw.
fn search_url(base_url: &str, platform: PlatformFlag, handle: &str) -> anyhow::Result<String> {
    let mut url = reqwest::Url::parse(base_url).context("invalid game API base url")?;
    url.path_segments_mut()
        .map_err(|_| anyhow::anyhow!("game API base url cannot be a base"))?
        .push("SearchDestinyPlayer")
        .push(&platform.code().to_string())
        .push(handle)
        // Trailing slash, as the upstream API expects.
        .push("");
    Ok(url.to_string())
}

#[derive(Debug, Deserialize)]
struct GameApiEnvelope<T> {
    #[serde(rename = "Response")]
    response: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerSearchHit {
    membership_id: String,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct AccountData {
    characters: Vec<CharacterEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterEntry {
    character_base: CharacterBase,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CharacterBase {
    character_id: String,
    date_last_played: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct InventoryData {
    items: Vec<InventoryItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InventoryItem {
    item_hash: u32,
    bucket_hash: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvisorData {
    sale_item_categories: Vec<SaleItemCategory>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleItemCategory {
    sale_items: Vec<SaleItem>,
}

#[derive(Debug, Deserialize)]
struct SaleItem {
    item: SaleItemRef,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaleItemRef {
    item_hash: u32,
    bucket_hash: u32,
}

fn latest_character(account: AccountData) -> Option<CharacterRef> {
    account
        .characters
        .into_iter()
        .max_by_key(|entry| entry.character_base.date_last_played)
        .map(|entry| CharacterRef {
            character_id: entry.character_base.character_id,
        })
}

fn loadout_from_items(items: Vec<InventoryItem>) -> Option<Loadout> {
    if items.is_empty() {
        return None;
    }

    let mut subclass = UNKNOWN_SUBCLASS;
    let mut weapon_ids = Vec::new();
    let mut armor_ids = Vec::new();
    for item in items {
        if item.bucket_hash == BUCKET_SUBCLASS {
            subclass = subclass_name(item.item_hash);
        } else if WEAPON_BUCKETS.contains(&item.bucket_hash) {
            weapon_ids.push(item.item_hash);
        } else if ARMOR_BUCKETS.contains(&item.bucket_hash) {
            armor_ids.push(item.item_hash);
        }
    }

    Some(Loadout {
        subclass: subclass.to_string(),
        weapon_ids,
        armor_ids,
    })
}

fn stubs_from_advisor(advisor: AdvisorData) -> Vec<ItemStub> {
    let mut stubs = Vec::new();
    for category in advisor.sale_item_categories {
        for sale in category.sale_items {
            let kind = if WEAPON_BUCKETS.contains(&sale.item.bucket_hash) {
                StubKind::Weapon
            } else if ARMOR_BUCKETS.contains(&sale.item.bucket_hash) {
                StubKind::Armor
            } else {
                // Consumables, shaders and the like never make the listing.
                continue;
            };
            stubs.push(ItemStub {
                id: sale.item.item_hash,
                kind,
            });
        }
    }
    stubs
}

#[async_trait]
impl IdentityService for BungieClient {
    async fn resolve(
        &self,
        requester_handle: &str,
        query: Option<&str>,
    ) -> anyhow::Result<IdentityLookup> {
        let handle = query.unwrap_or(requester_handle).trim().to_string();

        let other = match self.default_platform {
            PlatformFlag::Xbox => PlatformFlag::Playstation,
            PlatformFlag::Playstation => PlatformFlag::Xbox,
        };
        for platform in [self.default_platform, other] {
            if let Some(id) = self.search_player(platform, &handle).await? {
                return Ok(IdentityLookup {
                    id: Some(id),
                    handle,
                });
            }
        }
        Ok(IdentityLookup { id: None, handle })
    }
}

#[async_trait]
impl GameStateService for BungieClient {
    async fn last_played_character(
        &self,
        id: &PlatformPlayerId,
    ) -> anyhow::Result<Option<CharacterRef>> {
        let url = format!(
            "{}/{}/Account/{}/",
            self.base_url,
            id.platform.code(),
            id.membership_id
        );
        let account: Option<DataEnvelope<AccountData>> =
            self.get_envelope(url, "account summary").await?;
        Ok(account.and_then(|envelope| latest_character(envelope.data)))
    }

    async fn inventory(
        &self,
        id: &PlatformPlayerId,
        character_id: &str,
    ) -> anyhow::Result<Option<Loadout>> {
        let url = format!(
            "{}/{}/Account/{}/Character/{}/Inventory/Summary/",
            self.base_url,
            id.platform.code(),
            id.membership_id,
            character_id
        );
        let inventory: Option<DataEnvelope<InventoryData>> =
            self.get_envelope(url, "inventory summary").await?;
        Ok(inventory.and_then(|envelope| loadout_from_items(envelope.data.items)))
    }

    async fn current_vendor_stock(&self) -> anyhow::Result<Option<Vec<ItemStub>>> {
        let url = format!("{}/Advisors/Xur/", self.base_url);
        let advisor: Option<DataEnvelope<AdvisorData>> =
            self.get_envelope(url, "vendor advisor").await?;
        Ok(advisor.map(|envelope| stubs_from_advisor(envelope.data)))
    }
}

/// Client for the third-party elo/match statistics API.
#[derive(Clone)]
struct EloStatsClient {
    client: reqwest::Client,
    base_url: String,
}

impl EloStatsClient {
    fn from_env() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("STATS_API_BASE_URL")
                .ok()
                .unwrap_or_else(|| "https://api.guardian.gg".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FireteamMember {
    membership_id: String,
    name: String,
    elo: f64,
    kd: f64,
}

#[async_trait]
impl StatsService for EloStatsClient {
    async fn match_participants(
        &self,
        id: &PlatformPlayerId,
    ) -> anyhow::Result<Vec<MatchParticipant>> {
        let url = format!("{}/fireteam/14/{}", self.base_url, id.membership_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to fetch fireteam stats")?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_else(|_| "".to_string());
            anyhow::bail!("stats API returned {} for fireteam: {}", status, body);
        }
        let members = response
            .json::<Vec<FireteamMember>>()
            .await
            .context("invalid fireteam payload")?;

        Ok(members
            .into_iter()
            .map(|member| MatchParticipant {
                id: PlatformPlayerId {
                    platform: id.platform,
                    membership_id: member.membership_id,
                },
                display_name: member.name,
                rating: member.elo.round().max(0.0) as u32,
                kill_death_ratio: member.kd,
            })
            .collect())
    }
}

/// Catalog backed by a JSON manifest on local disk. `connect` loads the
/// manifest into id-keyed maps; `close` releases the handle.
#[derive(Clone)]
struct FileCatalogStore {
    manifest_path: String,
}

impl FileCatalogStore {
    fn from_env() -> Self {
        Self {
            manifest_path: std::env::var("CATALOG_MANIFEST_PATH")
                .ok()
                .unwrap_or_else(|| "/var/lib/vanguard/catalog.json".to_string()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogManifest {
    weapons: Vec<Weapon>,
    armor: Vec<Armor>,
}

struct FileCatalogConnection {
    weapons: HashMap<u32, Weapon>,
    armor: HashMap<u32, Armor>,
}

#[async_trait]
impl CatalogStore for FileCatalogStore {
    async fn connect(&self) -> anyhow::Result<Arc<dyn CatalogConnection>> {
        let raw = tokio::fs::read(&self.manifest_path)
            .await
            .with_context(|| format!("failed to read catalog manifest {}", self.manifest_path))?;
        let manifest: CatalogManifest =
            serde_json::from_slice(&raw).context("invalid catalog manifest")?;

        let weapons = manifest
            .weapons
            .into_iter()
            .map(|weapon| (weapon.id, weapon))
            .collect::<HashMap<_, _>>();
        let armor = manifest
            .armor
            .into_iter()
            .map(|piece| (piece.id, piece))
            .collect::<HashMap<_, _>>();
        debug!(
            weapons = weapons.len(),
            armor = armor.len(),
            "catalog manifest loaded"
        );
        Ok(Arc::new(FileCatalogConnection { weapons, armor }))
    }
}

#[async_trait]
impl CatalogConnection for FileCatalogConnection {
    async fn weapon(&self, id: u32) -> anyhow::Result<Option<Weapon>> {
        Ok(self.weapons.get(&id).cloned())
    }

    async fn armor_piece(&self, id: u32) -> anyhow::Result<Option<Armor>> {
        Ok(self.armor.get(&id).cloned())
    }

    async fn weapons(&self, ids: &[u32]) -> anyhow::Result<Vec<Weapon>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.weapons.get(id).cloned())
            .collect())
    }

    async fn armor_pieces(&self, ids: &[u32]) -> anyhow::Result<Vec<Armor>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.armor.get(id).cloned())
            .collect())
    }

    async fn close(&self) -> anyhow::Result<()> {
        debug!("catalog connection closed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "report_service=debug,tower_http=info".to_string()),
        )
        .init();

    let state = AppState::from_env()?;
    let app = build_router(state);

    if std::env::var("AWS_LAMBDA_RUNTIME_API").is_ok() {
        info!("AWS Lambda runtime detected; running report-service in lambda mode");
        lambda_run(app)
            .await
            .map_err(|e| anyhow::Error::msg(format!("lambda runtime error: {e}")))?;
        return Ok(());
    }

    let bind_addr = parse_bind_addr("REPORT_SERVICE_BIND", "0.0.0.0:8084")?;
    info!(%bind_addr, "report-service listening");
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/commands/trials", post(trials_handler))
        .route("/commands/xur", post(xur_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn parse_bind_addr(var_name: &str, default: &str) -> anyhow::Result<SocketAddr> {
    let value = std::env::var(var_name)
        .ok()
        .unwrap_or_else(|| default.to_string());
    value.parse().context(format!("invalid {var_name}"))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"ok": true, "service": "report-service"}))
}

/// Request context built by the chat dispatch layer: who asked, and the raw
/// text after the command keyword.
#[derive(Debug, Clone, Deserialize)]
struct CommandRequest {
    requester_handle: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum ResponseType {
    Ephemeral,
    InChannel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommandResponse {
    response_type: ResponseType,
    text: String,
}

impl CommandResponse {
    fn private(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Ephemeral,
            text: text.into(),
        }
    }

    fn public(text: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::InChannel,
            text: text.into(),
        }
    }
}

fn is_help(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("help")
}

fn query_text(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

async fn trials_handler(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    if is_help(&request.text) {
        return Ok(Json(CommandResponse::private(TRIALS_HELP)));
    }
    if request.requester_handle.trim().is_empty() {
        return Err(ApiError::bad_request("requester_handle is required"));
    }

    let report_id = Uuid::new_v4();
    let lookup = state
        .identity
        .resolve(&request.requester_handle, query_text(&request.text))
        .await
        .map_err(|e| ApiError::internal(format!("identity lookup failed: {e}")))?;

    let Some(player_id) = lookup.id.clone() else {
        info!(report_id = %report_id, handle = %lookup.handle, "player not found");
        return Ok(Json(CommandResponse::private(format!(
            "Unable to identify \"{}\"",
            lookup.handle
        ))));
    };

    let participants = state
        .stats
        .match_participants(&player_id)
        .await
        .map_err(|e| ApiError::internal(format!("stats fetch failed: {e}")))?;
    if participants.is_empty() {
        info!(report_id = %report_id, handle = %lookup.handle, "no trials data");
        return Ok(Json(CommandResponse::private(format!(
            "No Trials data found for \"{}\"",
            lookup.handle
        ))));
    }

    info!(
        report_id = %report_id,
        handle = %lookup.handle,
        participants = participants.len(),
        "building trials report"
    );
    let rows = build_trials_rows(&state, participants)
        .await
        .map_err(|e| ApiError::internal(format!("trials report failed: {e}")))?;
    Ok(Json(CommandResponse::public(render_trials_table(&rows))))
}

async fn xur_handler(
    State(state): State<AppState>,
    Json(request): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    if is_help(&request.text) {
        return Ok(Json(CommandResponse::private(XUR_HELP)));
    }

    let stock = state
        .game_state
        .current_vendor_stock()
        .await
        .map_err(|e| ApiError::internal(format!("vendor fetch failed: {e}")))?;
    let stock = match stock {
        Some(stock) if !stock.is_empty() => stock,
        _ => return Ok(Json(CommandResponse::private(XUR_UNAVAILABLE))),
    };

    let names = build_vendor_listing(&state, stock)
        .await
        .map_err(|e| ApiError::internal(format!("vendor report failed: {e}")))?;
    Ok(Json(CommandResponse::public(monospace(&names.join("\n")))))
}

/// Per-participant fan-out. The catalog connection is opened once before the
/// fan-out and closed on every path out of this function; join handles are
/// awaited in spawn order so rows keep the stats-service participant order.
async fn build_trials_rows(
    state: &AppState,
    participants: Vec<MatchParticipant>,
) -> anyhow::Result<Vec<EnrichedRow>> {
    let catalog = state
        .catalog
        .connect()
        .await
        .context("failed to open catalog connection")?;

    let mut handles = Vec::with_capacity(participants.len());
    for participant in participants {
        let game_state = state.game_state.clone();
        let connection = catalog.clone();
        let fallback = participant.clone();
        let handle = tokio::spawn(async move {
            enrich_participant(game_state, connection, participant).await
        });
        handles.push((fallback, handle));
    }

    let mut rows = Vec::with_capacity(handles.len());
    for (fallback, handle) in handles {
        match handle.await {
            Ok(row) => rows.push(row),
            Err(error) => {
                warn!(
                    name = %fallback.display_name,
                    error = %error,
                    "enrichment task aborted; rendering degraded row"
                );
                rows.push(EnrichedRow::degraded(fallback));
            }
        }
    }

    if let Err(error) = catalog.close().await {
        warn!(error = %error, "failed to close catalog connection");
    }
    Ok(rows)
}

/// Enrichment never fails the batch: any miss or upstream fault along the
/// way degrades this one row and is logged.
async fn enrich_participant(
    game_state: Arc<dyn GameStateService>,
    catalog: Arc<dyn CatalogConnection>,
    participant: MatchParticipant,
) -> EnrichedRow {
    let loadout = match fetch_loadout(game_state.as_ref(), &participant.id).await {
        Ok(Some(loadout)) => loadout,
        Ok(None) => return EnrichedRow::degraded(participant),
        Err(error) => {
            warn!(
                name = %participant.display_name,
                error = %error,
                "loadout fetch failed; rendering degraded row"
            );
            return EnrichedRow::degraded(participant);
        }
    };

    let weapons = match catalog.weapons(&loadout.weapon_ids).await {
        Ok(weapons) => weapons,
        Err(error) => {
            warn!(name = %participant.display_name, error = %error, "weapon lookup failed");
            Vec::new()
        }
    };
    let armors = match catalog.armor_pieces(&loadout.armor_ids).await {
        Ok(armors) => armors,
        Err(error) => {
            warn!(name = %participant.display_name, error = %error, "armor lookup failed");
            Vec::new()
        }
    };

    EnrichedRow::new(participant, loadout.subclass, weapons, armors)
}

/// Two-step optionality: no character means the inventory fetch is never
/// attempted.
async fn fetch_loadout(
    game_state: &dyn GameStateService,
    id: &PlatformPlayerId,
) -> anyhow::Result<Option<Loadout>> {
    let Some(character) = game_state.last_played_character(id).await? else {
        info!(
            membership_id = %id.membership_id,
            "no character found; skipping inventory fetch"
        );
        return Ok(None);
    };
    game_state.inventory(id, &character.character_id).await
}

async fn build_vendor_listing(
    state: &AppState,
    stock: Vec<ItemStub>,
) -> anyhow::Result<Vec<String>> {
    let catalog = state
        .catalog
        .connect()
        .await
        .context("failed to open catalog connection")?;
    let result = resolve_stock_names(catalog.as_ref(), &stock).await;
    if let Err(error) = catalog.close().await {
        warn!(error = %error, "failed to close catalog connection");
    }
    result
}

async fn resolve_stock_names(
    catalog: &dyn CatalogConnection,
    stock: &[ItemStub],
) -> anyhow::Result<Vec<String>> {
    let mut names = Vec::new();
    for stub in stock {
        let name = match stub.kind {
            StubKind::Weapon => catalog.weapon(stub.id).await?.map(|weapon| weapon.name),
            StubKind::Armor => catalog.armor_piece(stub.id).await?.map(|piece| piece.name),
        };
        match name {
            Some(name) => names.push(name),
            None => debug!(item = stub.id, "unresolved vendor item skipped"),
        }
    }
    Ok(names)
}

fn monospace(text: &str) -> String {
    format!("```\n{text}\n```")
}

/// K/D is shown with two decimals and right zero-fill to at least 4 chars.
fn format_ratio(ratio: f64) -> String {
    let mut formatted = format!("{ratio:.2}");
    while formatted.len() < 4 {
        formatted.push('0');
    }
    formatted
}

fn column_width<'a>(values: impl Iterator<Item = &'a str>) -> usize {
    values.map(|value| value.chars().count()).max().unwrap_or(0)
}

struct RowCells {
    name: String,
    url: String,
    subclass: String,
    rating: String,
    ratio: String,
    primary: String,
    special: String,
    heavy: String,
    exotic: Option<String>,
}

impl RowCells {
    fn from_row(row: &EnrichedRow) -> Self {
        let participant = &row.participant;
        Self {
            name: participant.display_name.clone(),
            url: profile_url(&participant.display_name, participant.id.platform),
            subclass: row.subclass.clone(),
            rating: format!("{:>4}", participant.rating),
            ratio: format_ratio(participant.kill_death_ratio),
            primary: row.weapon_in(WeaponCategory::Primary).label().to_string(),
            special: row.weapon_in(WeaponCategory::Special).label().to_string(),
            heavy: row.weapon_in(WeaponCategory::Heavy).label().to_string(),
            exotic: row.exotic_armor().map(|armor| armor.name.clone()),
        }
    }
}

/// Column width is the longest rendered value in that column; nothing is
/// ever truncated. Name and subclass are right-justified, weapon labels
/// left-justified. The name is wrapped in the chat hyperlink form with the
/// padding outside the link, and an exotic-armor segment is appended only
/// when the row has one.
fn render_trials_table(rows: &[EnrichedRow]) -> String {
    let cells: Vec<RowCells> = rows.iter().map(RowCells::from_row).collect();

    let name_width = column_width(cells.iter().map(|cell| cell.name.as_str()));
    let subclass_width = column_width(cells.iter().map(|cell| cell.subclass.as_str()));
    let primary_width = column_width(cells.iter().map(|cell| cell.primary.as_str()));
    let special_width = column_width(cells.iter().map(|cell| cell.special.as_str()));
    let heavy_width = column_width(cells.iter().map(|cell| cell.heavy.as_str()));

    let lines: Vec<String> = cells
        .iter()
        .map(|cell| {
            let pad = " ".repeat(name_width.saturating_sub(cell.name.chars().count()));
            let mut line = format!(
                "{pad}<{url}|{name}> | {subclass:>subclass_width$} | {rating} | {ratio} | \
                 {primary:<primary_width$} | {special:<special_width$} | {heavy:<heavy_width$}",
                url = cell.url,
                name = cell.name,
                subclass = cell.subclass,
                rating = cell.rating,
                ratio = cell.ratio,
                primary = cell.primary,
                special = cell.special,
                heavy = cell.heavy,
            );
            if let Some(exotic) = &cell.exotic {
                line.push_str(" | ");
                line.push_str(exotic);
            }
            line
        })
        .collect();

    monospace(&lines.join("\n"))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        warn!(status = %self.status, message = %self.message, "request failed");
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}
